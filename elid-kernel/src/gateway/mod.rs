/**
 * PERSISTENCE GATEWAY - Interface unifiée vers le stockage relationnel ELID
 *
 * RÔLE :
 * Ce module définit le seul point d'accès du kernel au stockage : existence
 * des équipements, mise à jour de statut, insertion des transactions et CRUD
 * utilisé par l'API REST.
 *
 * FONCTIONNEMENT :
 * - PersistenceGateway trait = opérations async que chaque backend implémente
 * - SqliteGateway = backend SQL (sqlx, pool de connexions partagé)
 * - MemoryGateway = backend mémoire pour le développement et les tests
 * - open_gateway() = sélection du backend depuis l'URL configurée
 *
 * GARANTIES ATTENDUES :
 * - Chaque opération est atomique individuellement (une requête = une instruction)
 * - Le backend est sûr en accès concurrent (générateurs + handlers HTTP)
 * - Aucune hypothèse sur le moteur au-delà de "durable à terme"
 */

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{Device, DeviceId, DeviceStatus, NewDevice, NewTransaction, Transaction};

pub use memory::MemoryGateway;
pub use sqlite::SqliteGateway;

/// Erreurs possibles lors des opérations de persistance
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Timestamp error: {0}")]
    Timestamp(String),
    #[error("Corrupted row: {0}")]
    Corrupted(String),
    #[error("Device not found: {0}")]
    DeviceMissing(DeviceId),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Label court et stable (snake_case) pour les logs
    pub fn as_label(&self) -> &'static str {
        match self {
            GatewayError::Database(_) => "gateway_database",
            GatewayError::Io(_) => "gateway_io",
            GatewayError::Serialization(_) => "gateway_serialization",
            GatewayError::Timestamp(_) => "gateway_timestamp",
            GatewayError::Corrupted(_) => "gateway_corrupted",
            GatewayError::DeviceMissing(_) => "gateway_device_missing",
            GatewayError::Unavailable(_) => "gateway_unavailable",
        }
    }
}

/// Interface commune que TOUS les backends de stockage doivent implémenter
/// Le superviseur d'activation n'utilise que les trois premières opérations
#[async_trait]
pub trait PersistenceGateway: Send + Sync + 'static {
    /// Vérifie qu'un équipement existe
    async fn device_exists(&self, id: DeviceId) -> Result<bool, GatewayError>;

    /// Met à jour le statut (et son horodatage) d'un équipement
    async fn set_device_status(&self, id: DeviceId, status: DeviceStatus) -> Result<(), GatewayError>;

    /// Ajoute une transaction au journal (append-only)
    async fn record_event(&self, tx: &NewTransaction) -> Result<(), GatewayError>;

    /// Liste tous les équipements, triés par id croissant
    async fn list_devices(&self) -> Result<Vec<Device>, GatewayError>;

    /// Crée un équipement (statut inactif, non verrouillé) et retourne son id
    async fn create_device(&self, device: &NewDevice) -> Result<DeviceId, GatewayError>;

    /// Inverse le verrou d'un équipement, `None` si l'équipement n'existe pas
    async fn toggle_lock(&self, id: DeviceId) -> Result<Option<bool>, GatewayError>;

    /// Dernières transactions, les plus récentes en premier
    async fn list_transactions(&self, limit: usize) -> Result<Vec<Transaction>, GatewayError>;

    /// Ids des équipements dont le statut stocké vaut `status`
    async fn devices_with_status(&self, status: DeviceStatus) -> Result<Vec<DeviceId>, GatewayError>;

    /// Nom du backend pour les logs et /system/health
    fn backend(&self) -> &'static str;
}

pub type SharedGateway = Arc<dyn PersistenceGateway>;

/// URL spéciale sélectionnant le backend mémoire
pub const MEMORY_URL: &str = "memory";

/// Ouvre le backend correspondant à l'URL configurée
/// Ex: "memory" -> MemoryGateway, "sqlite://./data/elid.db" -> SqliteGateway
pub async fn open_gateway(url: &str) -> Result<SharedGateway, GatewayError> {
    if url.trim() == MEMORY_URL {
        tracing::warn!("[gateway] using in-memory store, data is lost on exit");
        return Ok(Arc::new(MemoryGateway::new()));
    }
    let gateway = SqliteGateway::open(url).await?;
    Ok(Arc::new(gateway))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_gateway_memory_backend() {
        let gw = open_gateway("memory").await.unwrap();
        assert_eq!(gw.backend(), "memory");
        assert!(gw.list_devices().await.unwrap().is_empty());
    }

    #[test]
    fn test_error_labels_are_stable() {
        let id = DeviceId::new(3).unwrap();
        assert_eq!(GatewayError::DeviceMissing(id).as_label(), "gateway_device_missing");
        assert_eq!(GatewayError::Unavailable("down".into()).as_label(), "gateway_unavailable");
    }
}
