use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::activation::ActivationSupervisor;
use crate::gateway::SharedGateway;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub store_backend: String,
    pub devices_tracked: u32,
    pub active_generators: u32,
    pub live_generator_tasks: u32,
    pub events_recorded: u64,
    pub events_failed: u64,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    store_backend: &'static str,
}

impl HealthTracker {
    pub fn new(store_backend: &'static str) -> Self {
        Self {
            start_time: Instant::now(),
            store_backend,
        }
    }

    pub async fn get_health(
        &self,
        gateway: &SharedGateway,
        supervisor: &ActivationSupervisor,
    ) -> KernelHealth {
        let devices_tracked = match gateway.list_devices().await {
            Ok(devices) => devices.len() as u32,
            Err(e) => {
                tracing::warn!("[health] failed to count devices: {}", e);
                0
            }
        };
        let stats = supervisor.stats();
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            store_backend: self.store_backend.to_string(),
            devices_tracked,
            active_generators: supervisor.active_devices().len() as u32,
            live_generator_tasks: supervisor.live_tasks() as u32,
            events_recorded: stats.recorded(),
            events_failed: stats.failed(),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }

    /// Démarre le log périodique du health kernel (toutes les `every`)
    pub fn spawn_health_reporter(
        &self,
        gateway: SharedGateway,
        supervisor: Arc<ActivationSupervisor>,
        every: Duration,
        shutdown: CancellationToken,
    ) {
        let health_tracker = self.clone();

        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await; // le premier tick est immédiat

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let health = health_tracker.get_health(&gateway, &supervisor).await;
                        tracing::info!(
                            "[health] uptime: {}s, devices: {}, active: {}, events: {} recorded / {} failed",
                            health.uptime_seconds,
                            health.devices_tracked,
                            health.active_generators,
                            health.events_recorded,
                            health.events_failed
                        );
                    }
                }
            }
        });
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<u64>() {
                            return (kb as f32) / 1024.0; // KB -> MB
                        }
                    }
                }
            }
        }
    }

    // Valeur inconnue hors Linux
    0.0
}
