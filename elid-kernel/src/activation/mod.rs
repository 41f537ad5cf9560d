/**
 * ACTIVATION - Superviseur des générateurs d'événements par équipement
 *
 * RÔLE :
 * Démarre, suit et arrête UNE tâche de fond "générateur" par équipement actif.
 * Activation idempotente, arrêt coopératif, correct sous requêtes concurrentes.
 *
 * ARCHITECTURE :
 * ```text
 * HTTP handler ──► ActivationSupervisor::activate / deactivate
 *                     ├─► PersistenceGateway (existence + statut)
 *                     ├─► ActivationRegistry (verrou unique, try_insert / remove)
 *                     └─► EventGenerator (tokio task, CancellationToken)
 *                              └─► PersistenceGateway::record_event (best-effort)
 * ```
 *
 * RÈGLES :
 * - Un id est présent dans le registre ssi son générateur tourne
 * - Lancement APRÈS insertion, annulation APRÈS retrait (jamais avant)
 * - Le statut stocké reflète l'intention, le registre reflète la réalité
 */

pub mod generator;
pub mod registry;
pub mod supervisor;

use crate::gateway::GatewayError;
use crate::models::{DeviceId, InvalidDeviceId};

pub use generator::{EventGenerator, GeneratorConfig, GeneratorStats};
pub use registry::{ActivationRegistry, TaskHandle};
pub use supervisor::{Activation, ActivationSupervisor, Deactivation};

/// Erreurs remontées par Activate / Deactivate
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    /// Identifiant malformé, rejeté avant toute mutation
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidDeviceId),
    /// Équipement inconnu, rejeté avant toute mutation
    #[error("device not found: {0}")]
    NotFound(DeviceId),
    /// Le superviseur a été arrêté, plus aucun générateur ne peut démarrer
    #[error("supervisor is shutting down")]
    ShuttingDown,
    /// Échec de persistance (existence ou statut)
    #[error("internal error: {0}")]
    Internal(#[from] GatewayError),
}

impl ActivationError {
    /// Label court et stable (snake_case) pour les logs
    pub fn as_label(&self) -> &'static str {
        match self {
            ActivationError::InvalidInput(_) => "activation_invalid_input",
            ActivationError::NotFound(_) => "activation_not_found",
            ActivationError::ShuttingDown => "activation_shutting_down",
            ActivationError::Internal(_) => "activation_internal",
        }
    }

    /// Erreur imputable à l'appelant (400/404)
    pub fn is_client_error(&self) -> bool {
        matches!(self, ActivationError::InvalidInput(_) | ActivationError::NotFound(_))
    }
}
