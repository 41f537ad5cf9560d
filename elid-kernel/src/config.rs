use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::activation::GeneratorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid generator interval: min={min}ms max={max}ms (expected 0 < min < max)")]
    InvalidInterval { min: u64, max: u64 },
    #[error("invalid bind address: {0}")]
    InvalidBind(String),
}

impl ConfigError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Yaml(_) => "config_yaml",
            ConfigError::InvalidInterval { .. } => "config_invalid_interval",
            ConfigError::InvalidBind(_) => "config_invalid_bind",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub database: DatabaseConf,
    pub generator: GeneratorConf,
    pub supervisor: SupervisorConf,
    pub auth: AuthConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String, // ex: "0.0.0.0:8080"
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConf {
    pub url: String, // "memory" ou "sqlite://./data/elid.db"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeneratorConf {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SupervisorConf {
    pub resume_on_start: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConf {
    pub token_ttl_hours: u64,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            cors_origins: vec!["http://localhost:5173".into()],
        }
    }
}

impl Default for DatabaseConf {
    fn default() -> Self {
        Self { url: "sqlite://./data/elid.db".into() }
    }
}

impl Default for GeneratorConf {
    fn default() -> Self {
        Self { min_interval_ms: 500, max_interval_ms: 3000 }
    }
}

impl Default for AuthConf {
    fn default() -> Self {
        Self { token_ttl_hours: 8 }
    }
}

impl Default for SupervisorConf {
    fn default() -> Self {
        Self { resume_on_start: true }
    }
}

impl KernelConfig {
    /// Vérifie les valeurs que serde ne peut pas contrôler seul
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        self.generator_config()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.http.bind.clone()))
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.token_ttl_hours * 3600)
    }

    pub fn generator_config(&self) -> Result<GeneratorConfig, ConfigError> {
        let (min, max) = (self.generator.min_interval_ms, self.generator.max_interval_ms);
        if min == 0 || min >= max {
            return Err(ConfigError::InvalidInterval { min, max });
        }
        Ok(GeneratorConfig {
            min_interval: Duration::from_millis(min),
            max_interval: Duration::from_millis(max),
        })
    }
}

/// Parse + valide un texte YAML; un texte vide donne la config par défaut
pub fn parse_config(txt: &str) -> Result<KernelConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    let cfg: KernelConfig = serde_yaml::from_str(txt)?;
    cfg.validate()?;
    Ok(cfg)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("ELID_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            tracing::warn!(label = e.as_label(), "[kernel] config invalide ({path}): {e}");
            KernelConfig::default()
        })
    } else {
        tracing::warn!("[kernel] pas de {path}, usage config par défaut");
        KernelConfig::default()
    };

    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            cfg.database.url = url;
        }
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
        assert!(cfg.supervisor.resume_on_start);
        assert_eq!(cfg.http.cors_origins, vec!["http://localhost:5173".to_string()]);
        assert_eq!(cfg.token_ttl(), Duration::from_secs(8 * 3600));
        let generator = cfg.generator_config().unwrap();
        assert_eq!(generator, GeneratorConfig::default());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = parse_config(
            "database:\n  url: memory\ngenerator:\n  min_interval_ms: 100\n",
        )
        .unwrap();
        assert_eq!(cfg.database.url, "memory");
        assert_eq!(cfg.generator.min_interval_ms, 100);
        assert_eq!(cfg.generator.max_interval_ms, 3000);
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let cfg = parse_config("   \n").unwrap();
        assert_eq!(cfg.database.url, "sqlite://./data/elid.db");
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let err = parse_config("generator:\n  min_interval_ms: 3000\n  max_interval_ms: 500\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval { min: 3000, max: 500 }));

        let err = parse_config("generator:\n  min_interval_ms: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval { .. }));
    }

    #[test]
    fn test_invalid_bind_rejected() {
        let err = parse_config("http:\n  bind: not-an-addr\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBind(_)));
        assert_eq!(err.as_label(), "config_invalid_bind");
    }
}
