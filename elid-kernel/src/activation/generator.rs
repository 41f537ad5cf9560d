//! # Event generator: flux simulé d'événements d'accès pour UN équipement.
//!
//! ```text
//! loop {
//!   ├─► pause = uniform[min, max)
//!   ├─► select! { cancel → return, sleep(pause) → continue }
//!   ├─► tirer acteur + type d'événement
//!   └─► gateway.record_event(tx)   (échec = log + on continue)
//! }
//! ```
//!
//! ## Rules
//! - L'annulation n'est observée qu'à la frontière du sommeil (jamais en pleine écriture)
//! - Livraison best-effort, au plus une fois : pas de retry, pas de buffer
//! - Une graine par tâche : horloge murale mélangée à l'id de l'équipement

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::SharedGateway;
use crate::models::{DeviceId, EventType, NewTransaction, SIMULATED_ACTORS};

const PAYLOAD_NOTE: &str = "simulated";

/// Bornes de la pause entre deux événements, `[min_interval, max_interval)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_interval: Duration::from_millis(3000),
        }
    }
}

/// Compteurs partagés par tous les générateurs (exposés par /system/health).
#[derive(Debug, Default)]
pub struct GeneratorStats {
    recorded: AtomicU64,
    failed: AtomicU64,
}

impl GeneratorStats {
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct EventGenerator {
    device_id: DeviceId,
    gateway: SharedGateway,
    config: GeneratorConfig,
    stats: Arc<GeneratorStats>,
}

impl EventGenerator {
    pub fn new(
        device_id: DeviceId,
        gateway: SharedGateway,
        config: GeneratorConfig,
        stats: Arc<GeneratorStats>,
    ) -> Self {
        Self { device_id, gateway, config, stats }
    }

    /// Boucle jusqu'à l'annulation de `cancel`; c'est la seule condition de sortie.
    pub async fn run(self, cancel: CancellationToken) {
        let mut rng = seeded_rng(self.device_id);
        info!(device = %self.device_id, "[generator] started");

        loop {
            let pause = next_pause(&self.config, &mut rng);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(device = %self.device_id, "[generator] stopped");
                    return;
                }
                _ = tokio::time::sleep(pause) => {}
            }

            let tx = simulate_event(self.device_id, &mut rng);
            match self.gateway.record_event(&tx).await {
                Ok(()) => {
                    self.stats.recorded.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        device = %self.device_id,
                        actor = %tx.actor,
                        event = tx.event_type.as_str(),
                        "[generator] event recorded"
                    );
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        device = %self.device_id,
                        error = %e,
                        label = e.as_label(),
                        "[generator] failed to record event, dropping it"
                    );
                }
            }
        }
    }
}

fn seeded_rng(device_id: DeviceId) -> StdRng {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let mixed = (device_id.get() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    StdRng::seed_from_u64(nanos ^ mixed)
}

/// Pause tirée uniformément dans `[min, max)`; `min` si les bornes sont dégénérées.
fn next_pause<R: Rng + ?Sized>(config: &GeneratorConfig, rng: &mut R) -> Duration {
    let min = config.min_interval.as_millis() as u64;
    let max = config.max_interval.as_millis() as u64;
    if max <= min {
        return config.min_interval;
    }
    Duration::from_millis(rng.gen_range(min..max))
}

/// Construit une transaction simulée pour `device_id`.
pub fn simulate_event<R: Rng + ?Sized>(device_id: DeviceId, rng: &mut R) -> NewTransaction {
    let actor = SIMULATED_ACTORS.choose(rng).copied().unwrap_or("unknown");
    let event_type = EventType::ALL
        .choose(rng)
        .copied()
        .unwrap_or(EventType::AccessGranted);
    let entropy: f64 = rng.gen();

    NewTransaction {
        device_id,
        actor: actor.to_string(),
        event_type,
        occurred_at: OffsetDateTime::now_utc(),
        payload: serde_json::json!({ "entropy": entropy, "note": PAYLOAD_NOTE }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;

    fn fast() -> GeneratorConfig {
        GeneratorConfig {
            min_interval: Duration::from_millis(2),
            max_interval: Duration::from_millis(8),
        }
    }

    #[test]
    fn test_pause_stays_within_bounds() {
        let cfg = GeneratorConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1_000 {
            let p = next_pause(&cfg, &mut rng);
            assert!(p >= Duration::from_millis(500));
            assert!(p < Duration::from_millis(3000));
        }
    }

    #[test]
    fn test_degenerate_bounds_fall_back_to_min() {
        let cfg = GeneratorConfig {
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(10),
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(next_pause(&cfg, &mut rng), Duration::from_millis(10));
    }

    #[test]
    fn test_simulated_event_shape() {
        let id = DeviceId::new(7).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let tx = simulate_event(id, &mut rng);
            assert_eq!(tx.device_id, id);
            assert!(SIMULATED_ACTORS.contains(&tx.actor.as_str()));
            assert!(EventType::ALL.contains(&tx.event_type));
            assert_eq!(tx.payload["note"], "simulated");
            let entropy = tx.payload["entropy"].as_f64().unwrap();
            assert!((0.0..1.0).contains(&entropy));
        }
    }

    #[test]
    fn test_seeds_differ_between_devices() {
        let mut a = seeded_rng(DeviceId::new(1).unwrap());
        let mut b = seeded_rng(DeviceId::new(2).unwrap());
        let seq_a: Vec<u64> = (0..4).map(|_| a.gen()).collect();
        let seq_b: Vec<u64> = (0..4).map(|_| b.gen()).collect();
        assert_ne!(seq_a, seq_b);
    }

    #[tokio::test]
    async fn test_run_records_until_cancelled() {
        let gw = Arc::new(MemoryGateway::new());
        let id = gw.seed_device("Gate").unwrap();
        let stats = Arc::new(GeneratorStats::default());
        let cancel = CancellationToken::new();

        let generator = EventGenerator::new(id, gw.clone(), fast(), stats.clone());
        let task = tokio::spawn(generator.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        task.await.unwrap();

        let recorded = gw.events_for(id).len();
        assert!(recorded > 0);
        assert_eq!(stats.recorded(), recorded as u64);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(gw.events_for(id).len(), recorded);
    }

    #[tokio::test]
    async fn test_write_failures_do_not_stop_the_loop() {
        let gw = Arc::new(MemoryGateway::new());
        let id = gw.seed_device("Gate").unwrap();
        gw.fail_event_writes(true);
        let stats = Arc::new(GeneratorStats::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            EventGenerator::new(id, gw.clone(), fast(), stats.clone()).run(cancel.clone()),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(stats.failed() > 0);
        assert!(!task.is_finished());

        gw.fail_event_writes(false);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(stats.recorded() > 0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_before_first_event_records_nothing() {
        let gw = Arc::new(MemoryGateway::new());
        let id = gw.seed_device("Gate").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        EventGenerator::new(id, gw.clone(), GeneratorConfig::default(), Arc::default())
            .run(cancel)
            .await;
        assert_eq!(gw.event_count(), 0);
    }
}
