//! Backend SQL de la Persistence Gateway.
//!
//! Enveloppe un pool SQLite sqlx partagé entre les handlers HTTP et les
//! générateurs d'événements. Le schéma est créé à l'ouverture.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::{GatewayError, PersistenceGateway};
use crate::models::{Device, DeviceId, DeviceStatus, NewDevice, NewTransaction, Transaction};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT    NOT NULL,
        location    TEXT    NOT NULL DEFAULT '',
        device_type TEXT    NOT NULL DEFAULT 'access_controller',
        ip_address  TEXT,
        status      TEXT    NOT NULL DEFAULT 'inactive',
        is_locked   INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT    NOT NULL,
        updated_at  TEXT    NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id   INTEGER NOT NULL REFERENCES devices(id),
        actor       TEXT    NOT NULL,
        event_type  TEXT    NOT NULL,
        occurred_at TEXT    NOT NULL,
        payload     TEXT    NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_device ON transactions(device_id)",
];

/// Pool SQLite + opérations typées.
#[derive(Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Ouvre une base depuis une URL (`sqlite://./data/elid.db`).
    pub async fn open(url: &str) -> Result<Self, GatewayError> {
        let options = SqliteConnectOptions::from_str(url)?;
        Self::connect(options).await
    }

    /// Ouvre une base depuis un chemin de fichier.
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let options = SqliteConnectOptions::new().filename(path.as_ref());
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, GatewayError> {
        // le dossier du fichier doit exister avant create_if_missing
        let path = options.get_filename();
        if path != Path::new(":memory:") {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::info!("[gateway] sqlite store ready");
        Ok(Self { pool })
    }
}

fn format_ts(ts: OffsetDateTime) -> Result<String, GatewayError> {
    ts.format(&Rfc3339)
        .map_err(|e| GatewayError::Timestamp(e.to_string()))
}

fn parse_ts(raw: &str) -> Result<OffsetDateTime, GatewayError> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|e| GatewayError::Timestamp(format!("{raw}: {e}")))
}

fn device_id(raw: i64) -> Result<DeviceId, GatewayError> {
    DeviceId::new(raw).map_err(|e| GatewayError::Corrupted(e.to_string()))
}

fn device_from_row(row: &SqliteRow) -> Result<Device, GatewayError> {
    let device_type: String = row.try_get("device_type")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Device {
        id: device_id(row.try_get("id")?)?,
        name: row.try_get("name")?,
        location: row.try_get("location")?,
        device_type: device_type.parse().map_err(GatewayError::Corrupted)?,
        ip_address: row.try_get("ip_address")?,
        status: status.parse().map_err(GatewayError::Corrupted)?,
        is_locked: row.try_get("is_locked")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, GatewayError> {
    let event_type: String = row.try_get("event_type")?;
    let occurred_at: String = row.try_get("occurred_at")?;
    let payload: String = row.try_get("payload")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        device_id: device_id(row.try_get("device_id")?)?,
        device_name: row.try_get("device_name")?,
        actor: row.try_get("actor")?,
        event_type: event_type.parse().map_err(GatewayError::Corrupted)?,
        occurred_at: parse_ts(&occurred_at)?,
        payload: serde_json::from_str(&payload)?,
    })
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn device_exists(&self, id: DeviceId) -> Result<bool, GatewayError> {
        let row = sqlx::query("SELECT 1 FROM devices WHERE id = ?1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn set_device_status(&self, id: DeviceId, status: DeviceStatus) -> Result<(), GatewayError> {
        let result = sqlx::query("UPDATE devices SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id.get())
            .bind(status.as_str())
            .bind(format_ts(OffsetDateTime::now_utc())?)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::DeviceMissing(id));
        }
        Ok(())
    }

    async fn record_event(&self, tx: &NewTransaction) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (device_id, actor, event_type, occurred_at, payload)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(tx.device_id.get())
        .bind(&tx.actor)
        .bind(tx.event_type.as_str())
        .bind(format_ts(tx.occurred_at)?)
        .bind(serde_json::to_string(&tx.payload)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, GatewayError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, location, device_type, ip_address, status, is_locked,
                   created_at, updated_at
            FROM devices ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(device_from_row).collect()
    }

    async fn create_device(&self, device: &NewDevice) -> Result<DeviceId, GatewayError> {
        let now = format_ts(OffsetDateTime::now_utc())?;
        let row = sqlx::query(
            r#"
            INSERT INTO devices (name, location, device_type, ip_address, status, is_locked,
                                 created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'inactive', 0, ?5, ?5)
            RETURNING id
            "#,
        )
        .bind(&device.name)
        .bind(&device.location)
        .bind(device.device_type.as_str())
        .bind(&device.ip_address)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        device_id(row.try_get("id")?)
    }

    async fn toggle_lock(&self, id: DeviceId) -> Result<Option<bool>, GatewayError> {
        let row = sqlx::query(
            r#"
            UPDATE devices SET is_locked = NOT is_locked, updated_at = ?2
            WHERE id = ?1
            RETURNING is_locked
            "#,
        )
        .bind(id.get())
        .bind(format_ts(OffsetDateTime::now_utc())?)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("is_locked")?)),
            None => Ok(None),
        }
    }

    async fn list_transactions(&self, limit: usize) -> Result<Vec<Transaction>, GatewayError> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.device_id, d.name AS device_name, t.actor, t.event_type,
                   t.occurred_at, t.payload
            FROM transactions t
            JOIN devices d ON d.id = t.device_id
            ORDER BY t.id DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn devices_with_status(&self, status: DeviceStatus) -> Result<Vec<DeviceId>, GatewayError> {
        let rows = sqlx::query("SELECT id FROM devices WHERE status = ?1 ORDER BY id ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| device_id(row.try_get("id")?))
            .collect()
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceType, EventType};

    async fn open_temp() -> (tempfile::TempDir, SqliteGateway) {
        let dir = tempfile::tempdir().unwrap();
        let gw = SqliteGateway::open_path(dir.path().join("elid.db")).await.unwrap();
        (dir, gw)
    }

    fn new_device(name: &str) -> NewDevice {
        NewDevice {
            name: name.to_string(),
            location: "HQ".to_string(),
            device_type: DeviceType::Anpr,
            ip_address: Some("192.168.1.20".to_string()),
        }
    }

    #[tokio::test]
    async fn test_open_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("var").join("elid").join("elid.db");
        let gw = SqliteGateway::open_path(&nested).await.unwrap();
        assert!(nested.exists());
        assert!(gw.list_devices().await.unwrap().is_empty());

        let url = format!("sqlite://{}", dir.path().join("other").join("x.db").display());
        SqliteGateway::open(&url).await.unwrap();
        assert!(dir.path().join("other").join("x.db").exists());
    }

    #[tokio::test]
    async fn test_device_crud_round_trip() {
        let (_dir, gw) = open_temp().await;
        let id = gw.create_device(&new_device("Barrier")).await.unwrap();

        assert!(gw.device_exists(id).await.unwrap());
        assert!(!gw.device_exists(DeviceId::new(404).unwrap()).await.unwrap());

        let devices = gw.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Barrier");
        assert_eq!(devices[0].device_type, DeviceType::Anpr);
        assert_eq!(devices[0].status, DeviceStatus::Inactive);
        assert!(!devices[0].is_locked);

        assert_eq!(gw.toggle_lock(id).await.unwrap(), Some(true));
        assert_eq!(gw.toggle_lock(DeviceId::new(404).unwrap()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_status_update_and_lookup() {
        let (_dir, gw) = open_temp().await;
        let a = gw.create_device(&new_device("A")).await.unwrap();
        let b = gw.create_device(&new_device("B")).await.unwrap();

        gw.set_device_status(b, DeviceStatus::Active).await.unwrap();
        assert_eq!(gw.devices_with_status(DeviceStatus::Active).await.unwrap(), vec![b]);
        assert_eq!(gw.devices_with_status(DeviceStatus::Inactive).await.unwrap(), vec![a]);

        let err = gw
            .set_device_status(DeviceId::new(77).unwrap(), DeviceStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DeviceMissing(_)));
    }

    #[tokio::test]
    async fn test_transactions_join_device_name() {
        let (_dir, gw) = open_temp().await;
        let id = gw.create_device(&new_device("Lobby")).await.unwrap();

        for event_type in [EventType::FaceMatch, EventType::DoorForced] {
            gw.record_event(&NewTransaction {
                device_id: id,
                actor: "diana".to_string(),
                event_type,
                occurred_at: OffsetDateTime::now_utc(),
                payload: serde_json::json!({"entropy": 0.25, "note": "simulated"}),
            })
            .await
            .unwrap();
        }

        let txs = gw.list_transactions(10).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].event_type, EventType::DoorForced);
        assert_eq!(txs[0].device_name, "Lobby");
        assert_eq!(txs[1].payload["note"], "simulated");
    }

    #[tokio::test]
    async fn test_event_for_unknown_device_is_rejected() {
        let (_dir, gw) = open_temp().await;
        let result = gw
            .record_event(&NewTransaction {
                device_id: DeviceId::new(9).unwrap(),
                actor: "bob".to_string(),
                event_type: EventType::AccessDenied,
                occurred_at: OffsetDateTime::now_utc(),
                payload: serde_json::json!({}),
            })
            .await;
        assert!(result.is_err());
    }
}
