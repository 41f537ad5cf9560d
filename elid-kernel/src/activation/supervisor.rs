//! # ActivationSupervisor: surface de contrôle Activate / Deactivate.
//!
//! | Appel      | Registre           | Action                                   | Résultat      |
//! |------------|--------------------|------------------------------------------|---------------|
//! | activate   | équipement inconnu | —                                        | NotFound      |
//! | activate   | absent             | statut=active, try_insert, lancement     | Activated     |
//! | activate   | présent            | —                                        | AlreadyActive |
//! | deactivate | présent            | remove, annulation, statut=inactive      | Deactivated   |
//! | deactivate | absent             | statut=inactive                          | NotActive     |
//!
//! La décision de branche et la mutation du registre forment une seule étape
//! atomique (sous le verrou du registre). Les opérations sur un même équipement
//! sont en plus sérialisées par un verrou d'opération async : l'écriture du
//! statut et la mutation du registre d'une opération ne s'entrelacent jamais
//! avec celles d'une autre, la dernière opération terminée fixe les deux.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::generator::{EventGenerator, GeneratorConfig, GeneratorStats};
use super::registry::{ActivationRegistry, SlotGuard, TaskHandle};
use super::ActivationError;
use crate::gateway::SharedGateway;
use crate::models::{DeviceId, DeviceStatus};

/// Résultat d'un Activate réussi.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Activated,
    AlreadyActive,
}

impl Activation {
    pub fn as_status(&self) -> &'static str {
        match self {
            Activation::Activated => "activated",
            Activation::AlreadyActive => "already_active",
        }
    }
}

/// Résultat d'un Deactivate réussi.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deactivation {
    Deactivated,
    NotActive,
}

impl Deactivation {
    pub fn as_status(&self) -> &'static str {
        match self {
            Deactivation::Deactivated => "deactivated",
            Deactivation::NotActive => "not_active",
        }
    }
}

pub struct ActivationSupervisor {
    gateway: SharedGateway,
    registry: Arc<ActivationRegistry>,
    op_locks: Mutex<HashMap<DeviceId, Arc<tokio::sync::Mutex<()>>>>,
    config: GeneratorConfig,
    stats: Arc<GeneratorStats>,
    runtime_token: CancellationToken,
    tracker: TaskTracker,
}

impl ActivationSupervisor {
    pub fn new(gateway: SharedGateway, config: GeneratorConfig) -> Self {
        Self {
            gateway,
            registry: ActivationRegistry::new(),
            op_locks: Mutex::new(HashMap::new()),
            config,
            stats: Arc::new(GeneratorStats::default()),
            runtime_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Démarre le générateur de `device_id` (idempotent).
    pub async fn activate(&self, device_id: DeviceId) -> Result<Activation, ActivationError> {
        if self.runtime_token.is_cancelled() {
            return Err(ActivationError::ShuttingDown);
        }
        let op_lock = self.op_lock(device_id);
        let _op = op_lock.lock().await;
        self.ensure_exists(device_id).await?;

        if self.registry.contains(device_id) {
            return Ok(Activation::AlreadyActive);
        }

        // un échec ici annule tout : ni insertion, ni lancement
        if let Err(e) = self.gateway.set_device_status(device_id, DeviceStatus::Active).await {
            error!(device = %device_id, error = %e, "[supervisor] failed to persist active status");
            return Err(e.into());
        }

        let handle = TaskHandle::new(self.runtime_token.child_token());
        let token = handle.token();
        let stopped = handle.token();
        let instance_id = handle.instance_id();
        if !self.registry.try_insert(device_id, handle) {
            // try_insert reste le garde-fou final, même sous le verrou d'opération
            return Ok(Activation::AlreadyActive);
        }

        let generator = EventGenerator::new(
            device_id,
            self.gateway.clone(),
            self.config,
            self.stats.clone(),
        );
        let guard = SlotGuard::new(self.registry.clone(), device_id, instance_id);
        self.tracker.spawn(async move {
            let _guard = guard;
            generator.run(token).await;
        });

        // shutdown() a pu passer pendant l'écriture du statut : le token enfant
        // est alors déjà annulé et le générateur sort aussitôt
        if stopped.is_cancelled() {
            self.registry.remove_instance(device_id, instance_id);
            warn!(device = %device_id, "[supervisor] activation raced shutdown");
            return Err(ActivationError::ShuttingDown);
        }

        info!(device = %device_id, instance = %instance_id, "[supervisor] device activated");
        Ok(Activation::Activated)
    }

    /// Arrête le générateur de `device_id` et persiste statut=inactive.
    ///
    /// Si l'écriture du statut échoue, l'arrêt déjà effectué n'est pas annulé.
    pub async fn deactivate(&self, device_id: DeviceId) -> Result<Deactivation, ActivationError> {
        let op_lock = self.op_lock(device_id);
        let _op = op_lock.lock().await;
        self.ensure_exists(device_id).await?;

        let outcome = match self.registry.remove(device_id) {
            Some(handle) => {
                handle.cancel();
                info!(device = %device_id, instance = %handle.instance_id(), "[supervisor] device deactivated");
                Deactivation::Deactivated
            }
            None => Deactivation::NotActive,
        };

        // écrit même sans tâche, au cas où statut et registre divergent
        if let Err(e) = self.gateway.set_device_status(device_id, DeviceStatus::Inactive).await {
            error!(device = %device_id, error = %e, "[supervisor] failed to persist inactive status");
            return Err(e.into());
        }
        Ok(outcome)
    }

    pub fn is_active(&self, device_id: DeviceId) -> bool {
        self.registry.contains(device_id)
    }

    pub fn active_devices(&self) -> Vec<DeviceId> {
        self.registry.active_devices()
    }

    pub fn stats(&self) -> &GeneratorStats {
        &self.stats
    }

    /// Nombre de tâches générateur encore vivantes (y compris celles en cours d'arrêt).
    pub fn live_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Relance les équipements dont le statut stocké est `active`.
    ///
    /// Le registre est vide au démarrage : l'état d'activation se déduit du stockage.
    pub async fn resume_from_store(&self) -> Result<usize, ActivationError> {
        let ids = self.gateway.devices_with_status(DeviceStatus::Active).await?;
        let mut resumed = 0;
        for id in ids {
            match self.activate(id).await {
                Ok(Activation::Activated) => resumed += 1,
                Ok(Activation::AlreadyActive) => {}
                Err(e) => warn!(device = %id, error = %e, "[supervisor] failed to resume device"),
            }
        }
        info!("[supervisor] resumed {} active devices from store", resumed);
        Ok(resumed)
    }

    /// Annule tous les générateurs et attend leur fin.
    ///
    /// Les statuts stockés restent intacts pour la reprise au prochain démarrage.
    pub async fn shutdown(&self) {
        self.runtime_token.cancel();
        let drained = self.registry.drain();
        for (_, handle) in &drained {
            handle.cancel();
        }
        self.tracker.close();
        self.tracker.wait().await;
        info!("[supervisor] shutdown complete, stopped {} generators", drained.len());
    }

    fn op_lock(&self, device_id: DeviceId) -> Arc<tokio::sync::Mutex<()>> {
        self.op_locks.lock().entry(device_id).or_default().clone()
    }

    async fn ensure_exists(&self, device_id: DeviceId) -> Result<(), ActivationError> {
        match self.gateway.device_exists(device_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ActivationError::NotFound(device_id)),
            Err(e) => {
                error!(device = %device_id, error = %e, "[supervisor] device lookup failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryGateway, PersistenceGateway};
    use std::time::Duration;

    fn fast() -> GeneratorConfig {
        GeneratorConfig {
            min_interval: Duration::from_millis(2),
            max_interval: Duration::from_millis(10),
        }
    }

    fn setup() -> (Arc<MemoryGateway>, ActivationSupervisor) {
        let gw = Arc::new(MemoryGateway::new());
        let sup = ActivationSupervisor::new(gw.clone(), fast());
        (gw, sup)
    }

    #[tokio::test]
    async fn test_activate_then_already_active() {
        let (gw, sup) = setup();
        let id = gw.seed_device("Gate").unwrap();

        assert_eq!(sup.activate(id).await.unwrap(), Activation::Activated);
        assert_eq!(sup.activate(id).await.unwrap(), Activation::AlreadyActive);
        assert_eq!(sup.active_devices(), vec![id]);
        assert_eq!(gw.device_status(id), Some(DeviceStatus::Active));
        // le second appel ne réécrit pas le statut
        assert_eq!(gw.status_writes(), 1);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_activate_unknown_device() {
        let (gw, sup) = setup();
        let missing = DeviceId::new(42).unwrap();

        let err = sup.activate(missing).await.unwrap_err();
        assert!(matches!(err, ActivationError::NotFound(id) if id == missing));
        assert!(!sup.is_active(missing));
        assert_eq!(gw.status_writes(), 0);
    }

    #[tokio::test]
    async fn test_status_failure_aborts_activation() {
        let (gw, sup) = setup();
        let id = gw.seed_device("Gate").unwrap();
        gw.fail_status_writes(true);

        let err = sup.activate(id).await.unwrap_err();
        assert!(matches!(err, ActivationError::Internal(_)));
        assert!(!sup.is_active(id));
        assert_eq!(sup.live_tasks(), 0);
        assert_eq!(gw.device_status(id), Some(DeviceStatus::Inactive));
    }

    #[tokio::test]
    async fn test_deactivate_failure_still_stops_generator() {
        let (gw, sup) = setup();
        let id = gw.seed_device("Gate").unwrap();
        sup.activate(id).await.unwrap();

        gw.fail_status_writes(true);
        let err = sup.deactivate(id).await.unwrap_err();
        assert!(matches!(err, ActivationError::Internal(_)));
        assert!(!sup.is_active(id));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sup.live_tasks(), 0);
    }

    #[tokio::test]
    async fn test_deactivate_never_activated_device() {
        let (gw, sup) = setup();
        let id = gw.seed_device("Gate").unwrap();

        assert_eq!(sup.deactivate(id).await.unwrap(), Deactivation::NotActive);
        assert_eq!(gw.status_writes(), 1);
        assert_eq!(gw.device_status(id), Some(DeviceStatus::Inactive));
    }

    #[tokio::test]
    async fn test_resume_from_store() {
        let (gw, sup) = setup();
        let a = gw.seed_device("A").unwrap();
        let b = gw.seed_device("B").unwrap();
        gw.set_device_status(b, DeviceStatus::Active).await.unwrap();

        assert_eq!(sup.resume_from_store().await.unwrap(), 1);
        assert!(sup.is_active(b));
        assert!(!sup.is_active(a));

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything_and_keeps_status() {
        let (gw, sup) = setup();
        let ids: Vec<DeviceId> = (0..3).map(|i| gw.seed_device(&format!("D{i}")).unwrap()).collect();
        for id in &ids {
            sup.activate(*id).await.unwrap();
        }

        sup.shutdown().await;
        assert!(sup.active_devices().is_empty());
        assert_eq!(sup.live_tasks(), 0);
        for id in &ids {
            assert_eq!(gw.device_status(*id), Some(DeviceStatus::Active));
        }
        assert!(matches!(sup.activate(ids[0]).await, Err(ActivationError::ShuttingDown)));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(Activation::Activated.as_status(), "activated");
        assert_eq!(Activation::AlreadyActive.as_status(), "already_active");
        assert_eq!(Deactivation::Deactivated.as_status(), "deactivated");
        assert_eq!(Deactivation::NotActive.as_status(), "not_active");
    }
}
