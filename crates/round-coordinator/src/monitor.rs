use std::sync::Arc;

use sysinfo::{Pid, System};
use tracing::{debug, error};

use crate::coordinator::RoundCoordinator;

/// Samples CPU and resident memory of this process.
pub struct ResourceSampler {
    system: System,
    pid: Option<Pid>,
}

impl ResourceSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                error!("Resource sampling disabled: {}", e);
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }

    /// Returns `(cpu_percent, memory_mb)`. CPU reads 0 until the second sample.
    pub fn sample(&mut self) -> Option<(f64, f64)> {
        let pid = self.pid?;
        self.system.refresh_process(pid);
        let process = self.system.process(pid)?;
        let memory_mb = process.memory() as f64 / 1024.0 / 1024.0;
        Some((process.cpu_usage() as f64, memory_mb))
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// One monitoring pass: resource gauges, then the hash-rate estimate.
pub async fn tick(coordinator: &RoundCoordinator, sampler: &mut ResourceSampler) {
    if let Some((cpu, memory_mb)) = sampler.sample() {
        coordinator.metrics().set_resources(cpu, memory_mb);
    }

    match coordinator.refresh_hash_rate().await {
        Ok(rate) => debug!("Hash rate estimate {:.3} H/s", rate),
        Err(e) => error!("Hash rate refresh failed: {}", e),
    }
}

/// Runs until the task is dropped or aborted.
pub async fn run(coordinator: Arc<RoundCoordinator>) {
    let mut sampler = ResourceSampler::new();
    let mut interval = tokio::time::interval(coordinator.config().monitor_interval);
    loop {
        interval.tick().await;
        tick(&coordinator, &mut sampler).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;

    #[test]
    fn samples_own_process() {
        let mut sampler = ResourceSampler::new();
        let (cpu, memory_mb) = sampler.sample().expect("current process is visible");
        assert!(cpu >= 0.0);
        assert!(memory_mb > 0.0);
    }

    #[tokio::test]
    async fn tick_updates_gauges() {
        let coordinator = RoundCoordinator::new(CoordinatorConfig::in_memory())
            .await
            .unwrap();
        let mut sampler = ResourceSampler::new();

        tick(&coordinator, &mut sampler).await;

        let stats = coordinator.stats();
        assert!(stats.memory_usage > 0.0);
        assert_eq!(stats.hash_rate, 0.0);
    }
}
