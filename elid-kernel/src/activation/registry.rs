//! # Activation registry
//!
//! Map `DeviceId -> TaskHandle` protégée par UN SEUL verrou pour tout le registre.
//! C'est l'unique source de vérité pour "un générateur tourne-t-il pour X ?".
//!
//! ## Rules
//! - `try_insert` est le seul moyen de réserver un slot (check + insert atomiques)
//! - `remove` retourne le handle retiré, l'appelant déclenche l'annulation
//! - Aucun `.await` sous le verrou, aucun autre verrou tenu en même temps

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::DeviceId;

/// Capacité d'annulation d'UN générateur en cours d'exécution.
#[derive(Debug)]
pub struct TaskHandle {
    cancel: CancellationToken,
    instance_id: Uuid,
    started_at: OffsetDateTime,
}

impl TaskHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            instance_id: Uuid::new_v4(),
            started_at: OffsetDateTime::now_utc(),
        }
    }

    /// Token observé par le générateur.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }
}

#[derive(Debug, Default)]
pub struct ActivationRegistry {
    slots: Mutex<HashMap<DeviceId, TaskHandle>>,
}

impl ActivationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Réserve le slot de `device_id`. Retourne `false` sans rien modifier
    /// si un handle est déjà présent.
    pub fn try_insert(&self, device_id: DeviceId, handle: TaskHandle) -> bool {
        let mut slots = self.slots.lock();
        if slots.contains_key(&device_id) {
            return false;
        }
        slots.insert(device_id, handle);
        true
    }

    /// Retire et retourne le handle de `device_id`, s'il existe.
    pub fn remove(&self, device_id: DeviceId) -> Option<TaskHandle> {
        self.slots.lock().remove(&device_id)
    }

    /// Retire le slot seulement s'il appartient encore à `instance_id`.
    ///
    /// Utilisé par un générateur qui se termine sans annulation (panic) :
    /// ne doit jamais retirer le handle d'une activation plus récente.
    pub fn remove_instance(&self, device_id: DeviceId, instance_id: Uuid) -> Option<TaskHandle> {
        let mut slots = self.slots.lock();
        match slots.get(&device_id) {
            Some(h) if h.instance_id == instance_id => slots.remove(&device_id),
            _ => None,
        }
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.slots.lock().contains_key(&device_id)
    }

    /// Ids actifs, triés.
    pub fn active_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.slots.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Vide le registre (arrêt du process).
    pub fn drain(&self) -> Vec<(DeviceId, TaskHandle)> {
        self.slots.lock().drain().collect()
    }
}

/// Libère le slot d'un générateur qui sort de sa boucle, quelle qu'en soit la cause.
///
/// Sur le chemin normal (Deactivate) le slot a déjà été retiré : no-op.
pub(crate) struct SlotGuard {
    registry: Arc<ActivationRegistry>,
    device_id: DeviceId,
    instance_id: Uuid,
}

impl SlotGuard {
    pub(crate) fn new(registry: Arc<ActivationRegistry>, device_id: DeviceId, instance_id: Uuid) -> Self {
        Self { registry, device_id, instance_id }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.registry.remove_instance(self.device_id, self.instance_id) {
            handle.cancel();
            tracing::warn!(
                device = %self.device_id,
                instance = %self.instance_id,
                "[registry] generator exited without deactivation, slot released"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: i64) -> DeviceId {
        DeviceId::new(raw).unwrap()
    }

    #[test]
    fn test_try_insert_is_exclusive() {
        let registry = ActivationRegistry::new();
        assert!(registry.try_insert(id(1), TaskHandle::new(CancellationToken::new())));
        assert!(!registry.try_insert(id(1), TaskHandle::new(CancellationToken::new())));
        assert!(registry.try_insert(id(2), TaskHandle::new(CancellationToken::new())));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_devices(), vec![id(1), id(2)]);
    }

    #[test]
    fn test_rejected_insert_keeps_original_handle() {
        let registry = ActivationRegistry::new();
        let first = TaskHandle::new(CancellationToken::new());
        let first_id = first.instance_id();
        registry.try_insert(id(3), first);
        registry.try_insert(id(3), TaskHandle::new(CancellationToken::new()));

        let removed = registry.remove(id(3)).unwrap();
        assert_eq!(removed.instance_id(), first_id);
        assert!(registry.remove(id(3)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_instance_ignores_newer_activation() {
        let registry = ActivationRegistry::new();
        let stale = Uuid::new_v4();
        let handle = TaskHandle::new(CancellationToken::new());
        let current = handle.instance_id();
        registry.try_insert(id(5), handle);

        assert!(registry.remove_instance(id(5), stale).is_none());
        assert!(registry.contains(id(5)));
        assert!(registry.remove_instance(id(5), current).is_some());
        assert!(!registry.contains(id(5)));
    }

    #[test]
    fn test_handle_cancel_marks_not_running() {
        let handle = TaskHandle::new(CancellationToken::new());
        let token = handle.token();
        assert!(handle.is_running());
        handle.cancel();
        assert!(!handle.is_running());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_slot_guard_releases_own_slot_only() {
        let registry = ActivationRegistry::new();
        let handle = TaskHandle::new(CancellationToken::new());
        let token = handle.token();
        let instance = handle.instance_id();
        registry.try_insert(id(9), handle);

        drop(SlotGuard::new(registry.clone(), id(9), Uuid::new_v4()));
        assert!(registry.contains(id(9)));

        drop(SlotGuard::new(registry.clone(), id(9), instance));
        assert!(!registry.contains(id(9)));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = ActivationRegistry::new();
        for raw in 1..=3 {
            registry.try_insert(id(raw), TaskHandle::new(CancellationToken::new()));
        }
        let drained = registry.drain();
        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty());
    }
}
