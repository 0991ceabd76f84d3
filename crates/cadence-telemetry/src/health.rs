//! Process health snapshot for the admin channel.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub uptime: String,
    pub services: BTreeMap<String, ServiceState>,
    pub active_tenants: u32,
    pub queue_depth: u64,
}

impl HealthSnapshot {
    /// Overall status is healthy only when every service is up.
    pub fn build(
        started_at: Instant,
        services: BTreeMap<String, ServiceState>,
        active_tenants: u32,
        queue_depth: u64,
    ) -> Self {
        let healthy = services.values().all(|s| *s == ServiceState::Up);
        Self {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            uptime: format_uptime(started_at.elapsed().as_secs()),
            services,
            active_tenants,
            queue_depth,
        }
    }
}

fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else {
        format!("{hours}h {minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_when_any_service_down() {
        let mut services = BTreeMap::new();
        services.insert("database".to_string(), ServiceState::Up);
        services.insert("queue".to_string(), ServiceState::Down);

        let snap = HealthSnapshot::build(Instant::now(), services, 3, 12);
        assert_eq!(snap.status, "degraded");
        assert_eq!(snap.active_tenants, 3);
        assert_eq!(snap.queue_depth, 12);
    }

    #[test]
    fn healthy_when_all_up() {
        let mut services = BTreeMap::new();
        services.insert("database".to_string(), ServiceState::Up);
        let snap = HealthSnapshot::build(Instant::now(), services, 1, 0);
        assert_eq!(snap.status, "healthy");
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(59), "0h 0m");
        assert_eq!(format_uptime(3_661), "1h 1m");
        assert_eq!(format_uptime(90_061), "1d 1h 1m");
    }
}
