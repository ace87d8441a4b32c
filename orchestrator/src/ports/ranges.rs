//! Port ranges per environment and service

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::project::Environment;

/// Service whose range is used when a service has none of its own
pub const DEFAULT_SERVICE: &str = "app";

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

/// Disjoint port ranges keyed by environment then service.
///
/// The `preview` environment has a single pool shared by all pull requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortRanges(BTreeMap<Environment, BTreeMap<String, PortRange>>);

impl Default for PortRanges {
    fn default() -> Self {
        let mut ranges = BTreeMap::new();
        ranges.insert(
            Environment::Staging,
            BTreeMap::from([
                ("app".to_string(), PortRange::new(3000, 3499)),
                ("postgres".to_string(), PortRange::new(15432, 15481)),
                ("redis".to_string(), PortRange::new(16379, 16428)),
            ]),
        );
        ranges.insert(
            Environment::Production,
            BTreeMap::from([
                ("app".to_string(), PortRange::new(4000, 4499)),
                ("postgres".to_string(), PortRange::new(25432, 25481)),
                ("redis".to_string(), PortRange::new(26379, 26428)),
            ]),
        );
        ranges.insert(
            Environment::Preview,
            BTreeMap::from([("app".to_string(), PortRange::new(5000, 5999))]),
        );
        Self(ranges)
    }
}

impl PortRanges {
    pub fn new(ranges: BTreeMap<Environment, BTreeMap<String, PortRange>>) -> Self {
        Self(ranges)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Range scanned for `service` in `environment`.
    ///
    /// Service names may carry a suffix (`app-green`, `app-canary`); the part
    /// before the first dash selects the range. Preview always uses its pool.
    pub fn range_for(&self, environment: Environment, service: &str) -> Option<PortRange> {
        let services = self.0.get(&environment)?;
        if environment == Environment::Preview {
            return services.get(DEFAULT_SERVICE).copied();
        }
        let base = service.split('-').next().unwrap_or(service);
        services
            .get(base)
            .or_else(|| services.get(DEFAULT_SERVICE))
            .copied()
    }

    /// Check that no two ranges overlap
    pub fn validate(&self) -> Result<(), String> {
        let mut all: Vec<(String, PortRange)> = self
            .0
            .iter()
            .flat_map(|(env, services)| {
                services
                    .iter()
                    .map(move |(service, range)| (format!("{}/{}", env, service), *range))
            })
            .collect();

        for (name, range) in &all {
            if range.start == 0 || range.start > range.end {
                return Err(format!("range {} is empty or starts at 0", name));
            }
        }

        all.sort_by_key(|(_, range)| range.start);
        for pair in all.windows(2) {
            if pair[1].1.start <= pair[0].1.end {
                return Err(format!("ranges {} and {} overlap", pair[0].0, pair[1].0));
            }
        }
        Ok(())
    }
}
