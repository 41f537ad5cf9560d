/**
 * MODÈLES ELID - Équipements, statuts et transactions simulées
 *
 * RÔLE : Types partagés entre la passerelle de persistance, le superviseur
 * d'activation et l'API REST.
 *
 * INVARIANTS :
 * - DeviceId est toujours un entier strictement positif (validé à la construction)
 * - Les transactions sont append-only, jamais modifiées après écriture
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Identifiant malformé (non numérique, nul ou négatif)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device id: {0:?}")]
pub struct InvalidDeviceId(pub String);

/// Clé stable d'un équipement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct DeviceId(i64);

impl DeviceId {
    pub fn new(raw: i64) -> Result<Self, InvalidDeviceId> {
        if raw <= 0 {
            return Err(InvalidDeviceId(raw.to_string()));
        }
        Ok(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for DeviceId {
    type Error = InvalidDeviceId;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<DeviceId> for i64 {
    fn from(id: DeviceId) -> i64 {
        id.0
    }
}

impl FromStr for DeviceId {
    type Err = InvalidDeviceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .trim()
            .parse::<i64>()
            .map_err(|_| InvalidDeviceId(s.to_string()))?;
        Self::new(raw).map_err(|_| InvalidDeviceId(s.to_string()))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Famille matérielle de l'équipement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    AccessController,
    FaceReader,
    Anpr,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::AccessController => "access_controller",
            DeviceType::FaceReader => "face_reader",
            DeviceType::Anpr => "anpr",
        }
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access_controller" => Ok(DeviceType::AccessController),
            "face_reader" => Ok(DeviceType::FaceReader),
            "anpr" => Ok(DeviceType::Anpr),
            other => Err(format!("unknown device type: {other}")),
        }
    }
}

/// Statut persistant : reflète l'intention de l'opérateur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    #[default]
    Inactive,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "active",
            DeviceStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DeviceStatus::Active),
            "inactive" => Ok(DeviceStatus::Inactive),
            other => Err(format!("unknown device status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub location: String,
    pub device_type: DeviceType,
    pub ip_address: Option<String>,
    pub status: DeviceStatus,
    pub is_locked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Payload de création (POST /api/devices)
#[derive(Debug, Clone, Deserialize)]
pub struct NewDevice {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// Type d'événement d'accès produit par le générateur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AccessGranted,
    AccessDenied,
    FaceMatch,
    PlateRead,
    DoorForced,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::AccessGranted,
        EventType::AccessDenied,
        EventType::FaceMatch,
        EventType::PlateRead,
        EventType::DoorForced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AccessGranted => "access_granted",
            EventType::AccessDenied => "access_denied",
            EventType::FaceMatch => "face_match",
            EventType::PlateRead => "plate_read",
            EventType::DoorForced => "door_forced",
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// Acteurs simulés tirés au hasard par le générateur
pub const SIMULATED_ACTORS: [&str; 5] = ["alice", "bob", "charlie", "diana", "eve"];

/// Transaction à insérer (sans id, attribué par le stockage)
#[derive(Debug, Clone, Serialize)]
pub struct NewTransaction {
    pub device_id: DeviceId,
    pub actor: String,
    pub event_type: EventType,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    pub payload: serde_json::Value,
}

/// Transaction relue depuis le stockage, jointe au nom de l'équipement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub device_id: DeviceId,
    pub device_name: String,
    pub actor: String,
    pub event_type: EventType,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    pub payload: serde_json::Value,
}
