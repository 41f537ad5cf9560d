/**
 * MEMORY GATEWAY - Stockage en mémoire pour le développement et les tests
 *
 * RÔLE :
 * Implémentation complète de PersistenceGateway sans base de données.
 * Sélectionnée avec `database.url: memory`, et utilisée par les tests.
 *
 * FONCTIONNEMENT :
 * - Un seul Mutex protège équipements + journal (chaque opération est atomique)
 * - Ids auto-incrémentés comme une clé SQL
 * - Injection de pannes (écritures de statut / d'événements) pour les tests
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use time::OffsetDateTime;

use super::{GatewayError, PersistenceGateway};
use crate::models::{Device, DeviceId, DeviceStatus, NewDevice, NewTransaction, Transaction};

struct StoredTransaction {
    id: i64,
    tx: NewTransaction,
}

#[derive(Default)]
struct MemoryStore {
    devices: BTreeMap<DeviceId, Device>,
    transactions: Vec<StoredTransaction>,
    next_device_id: i64,
    next_transaction_id: i64,
}

pub struct MemoryGateway {
    store: Mutex<MemoryStore>,
    fail_status_writes: AtomicBool,
    fail_event_writes: AtomicBool,
    status_writes: AtomicU64,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(MemoryStore::default()),
            fail_status_writes: AtomicBool::new(false),
            fail_event_writes: AtomicBool::new(false),
            status_writes: AtomicU64::new(0),
        }
    }

    /// Insère directement un équipement inactif (fixtures)
    pub fn seed_device(&self, name: &str) -> Result<DeviceId, GatewayError> {
        let mut store = self.store.lock();
        Self::insert_device(
            &mut store,
            &NewDevice {
                name: name.to_string(),
                location: String::new(),
                device_type: Default::default(),
                ip_address: None,
            },
        )
    }

    /// Fait échouer (ou non) toutes les écritures de statut suivantes
    pub fn fail_status_writes(&self, fail: bool) {
        self.fail_status_writes.store(fail, Ordering::SeqCst);
    }

    /// Fait échouer (ou non) toutes les insertions d'événements suivantes
    pub fn fail_event_writes(&self, fail: bool) {
        self.fail_event_writes.store(fail, Ordering::SeqCst);
    }

    /// Nombre d'écritures de statut réussies depuis la création
    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn device_status(&self, id: DeviceId) -> Option<DeviceStatus> {
        self.store.lock().devices.get(&id).map(|d| d.status)
    }

    /// Événements enregistrés pour un équipement, dans l'ordre d'insertion
    pub fn events_for(&self, id: DeviceId) -> Vec<NewTransaction> {
        self.store
            .lock()
            .transactions
            .iter()
            .filter(|t| t.tx.device_id == id)
            .map(|t| t.tx.clone())
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.store.lock().transactions.len()
    }

    fn insert_device(store: &mut MemoryStore, device: &NewDevice) -> Result<DeviceId, GatewayError> {
        store.next_device_id += 1;
        let id = DeviceId::new(store.next_device_id)
            .map_err(|e| GatewayError::Corrupted(e.to_string()))?;
        let now = OffsetDateTime::now_utc();
        store.devices.insert(
            id,
            Device {
                id,
                name: device.name.clone(),
                location: device.location.clone(),
                device_type: device.device_type,
                ip_address: device.ip_address.clone(),
                status: DeviceStatus::Inactive,
                is_locked: false,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn device_exists(&self, id: DeviceId) -> Result<bool, GatewayError> {
        Ok(self.store.lock().devices.contains_key(&id))
    }

    async fn set_device_status(&self, id: DeviceId, status: DeviceStatus) -> Result<(), GatewayError> {
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("status write rejected".into()));
        }
        let mut store = self.store.lock();
        let device = store
            .devices
            .get_mut(&id)
            .ok_or(GatewayError::DeviceMissing(id))?;
        device.status = status;
        device.updated_at = OffsetDateTime::now_utc();
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn record_event(&self, tx: &NewTransaction) -> Result<(), GatewayError> {
        if self.fail_event_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("event insert rejected".into()));
        }
        let mut store = self.store.lock();
        if !store.devices.contains_key(&tx.device_id) {
            return Err(GatewayError::DeviceMissing(tx.device_id));
        }
        store.next_transaction_id += 1;
        let id = store.next_transaction_id;
        store.transactions.push(StoredTransaction { id, tx: tx.clone() });
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, GatewayError> {
        Ok(self.store.lock().devices.values().cloned().collect())
    }

    async fn create_device(&self, device: &NewDevice) -> Result<DeviceId, GatewayError> {
        let mut store = self.store.lock();
        Self::insert_device(&mut store, device)
    }

    async fn toggle_lock(&self, id: DeviceId) -> Result<Option<bool>, GatewayError> {
        let mut store = self.store.lock();
        let Some(device) = store.devices.get_mut(&id) else { return Ok(None); };
        device.is_locked = !device.is_locked;
        device.updated_at = OffsetDateTime::now_utc();
        Ok(Some(device.is_locked))
    }

    async fn list_transactions(&self, limit: usize) -> Result<Vec<Transaction>, GatewayError> {
        let store = self.store.lock();
        let out = store
            .transactions
            .iter()
            .rev()
            .take(limit)
            .map(|t| Transaction {
                id: t.id,
                device_id: t.tx.device_id,
                device_name: store
                    .devices
                    .get(&t.tx.device_id)
                    .map(|d| d.name.clone())
                    .unwrap_or_default(),
                actor: t.tx.actor.clone(),
                event_type: t.tx.event_type,
                occurred_at: t.tx.occurred_at,
                payload: t.tx.payload.clone(),
            })
            .collect();
        Ok(out)
    }

    async fn devices_with_status(&self, status: DeviceStatus) -> Result<Vec<DeviceId>, GatewayError> {
        Ok(self
            .store
            .lock()
            .devices
            .values()
            .filter(|d| d.status == status)
            .map(|d| d.id)
            .collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
