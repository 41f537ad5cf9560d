/**
 * ELID KERNEL - Superviseur d'activation des équipements de contrôle d'accès
 *
 * RÔLE : Registre des générateurs par équipement + API REST + passerelle de persistance.
 * Les modules sont exposés en bibliothèque pour les tests d'intégration (tests/).
 */

pub mod activation;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod health;
pub mod http;
pub mod models;
