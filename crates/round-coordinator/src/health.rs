use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{CoordinatorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Ledger,
    Metrics,
    Api,
    MinerProxy,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Ledger => "ledger",
            Component::Metrics => "metrics",
            Component::Api => "api",
            Component::MinerProxy => "miner_proxy",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ledger" => Ok(Component::Ledger),
            "metrics" => Ok(Component::Metrics),
            "api" => Ok(Component::Api),
            "miner_proxy" | "miner-proxy" => Ok(Component::MinerProxy),
            other => Err(CoordinatorError::UnknownComponent(other.to_string())),
        }
    }
}

/// `Unknown -> Ready -> Faulted`; a faulted component returns to `Ready`
/// only when its owner reports recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Unknown,
    Ready,
    Faulted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub components: BTreeMap<Component, bool>,
    pub states: BTreeMap<Component, ComponentState>,
    pub uptime: f64,
}

pub struct HealthAggregator {
    states: RwLock<BTreeMap<Component, ComponentState>>,
    started: Instant,
}

impl HealthAggregator {
    pub fn new(components: &[Component]) -> Self {
        let states = components
            .iter()
            .map(|c| (*c, ComponentState::Unknown))
            .collect();
        Self {
            states: RwLock::new(states),
            started: Instant::now(),
        }
    }

    pub fn mark_ready(&self, component: Component) -> Result<()> {
        self.transition(component, ComponentState::Ready)
    }

    pub fn mark_faulted(&self, component: Component) -> Result<()> {
        self.transition(component, ComponentState::Faulted)
    }

    fn transition(&self, component: Component, next: ComponentState) -> Result<()> {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        let state = states
            .get_mut(&component)
            .ok_or_else(|| CoordinatorError::UnknownComponent(component.to_string()))?;

        if *state != next {
            match next {
                ComponentState::Faulted => warn!("Component {} faulted", component),
                _ => info!("Component {} is {:?}", component, next),
            }
            *state = next;
        }
        Ok(())
    }

    pub fn state(&self, component: Component) -> Option<ComponentState> {
        self.states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&component)
            .copied()
    }

    pub fn uptime(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let states = self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let components: BTreeMap<_, _> = states
            .iter()
            .map(|(c, s)| (*c, *s == ComponentState::Ready))
            .collect();
        let healthy = components.values().all(|ready| *ready);

        HealthSnapshot {
            status: if healthy { "healthy" } else { "unhealthy" },
            components,
            states,
            uptime: self.uptime(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORE: [Component; 3] = [Component::Ledger, Component::Metrics, Component::Api];

    #[test]
    fn starts_unhealthy_until_everything_is_ready() {
        let health = HealthAggregator::new(&CORE);
        assert_eq!(health.snapshot().status, "unhealthy");

        health.mark_ready(Component::Ledger).unwrap();
        health.mark_ready(Component::Metrics).unwrap();
        assert_eq!(health.snapshot().status, "unhealthy");

        health.mark_ready(Component::Api).unwrap();
        let snapshot = health.snapshot();
        assert_eq!(snapshot.status, "healthy");
        assert!(snapshot.components.values().all(|ready| *ready));
    }

    #[test]
    fn fault_and_explicit_recovery() {
        let health = HealthAggregator::new(&CORE);
        for c in CORE {
            health.mark_ready(c).unwrap();
        }

        health.mark_faulted(Component::Ledger).unwrap();
        let snapshot = health.snapshot();
        assert_eq!(snapshot.status, "unhealthy");
        assert_eq!(snapshot.states[&Component::Ledger], ComponentState::Faulted);
        assert!(!snapshot.components[&Component::Ledger]);

        health.mark_ready(Component::Ledger).unwrap();
        assert_eq!(health.snapshot().status, "healthy");
    }

    #[test]
    fn repeated_reads_are_stable() {
        let health = HealthAggregator::new(&CORE);
        health.mark_ready(Component::Api).unwrap();

        let first = health.snapshot();
        let second = health.snapshot();
        assert_eq!(first.components, second.components);
        assert!(second.uptime >= first.uptime);
    }

    #[test]
    fn untracked_components_are_rejected() {
        let health = HealthAggregator::new(&CORE);
        assert!(matches!(
            health.mark_ready(Component::MinerProxy),
            Err(CoordinatorError::UnknownComponent(_))
        ));
        assert_eq!(health.state(Component::MinerProxy), None);
    }

    #[test]
    fn parses_component_names() {
        assert_eq!("miner-proxy".parse::<Component>().unwrap(), Component::MinerProxy);
        assert_eq!("ledger".parse::<Component>().unwrap(), Component::Ledger);
        assert!("bitcoind".parse::<Component>().is_err());
    }

    #[test]
    fn serializes_components_by_name() {
        let health = HealthAggregator::new(&[Component::Ledger, Component::MinerProxy]);
        health.mark_ready(Component::Ledger).unwrap();
        let value = serde_json::to_value(health.snapshot()).unwrap();
        assert_eq!(value["components"]["ledger"], true);
        assert_eq!(value["components"]["miner_proxy"], false);
        assert_eq!(value["states"]["miner_proxy"], "unknown");
    }
}
