//! Host grouping: one group per unique host across a route's rules.

use std::collections::BTreeMap;

use crate::model::{PathRule, Rule};

/// All paths declared for one host, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostGroup {
    pub host: String,
    pub paths: Vec<PathRule>,
}

/// Result of grouping a route's rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostGrouping {
    /// Groups sorted by host.
    pub groups: Vec<HostGroup>,
    /// Number of rules skipped because their host was empty.
    pub empty_hosts: usize,
}

/// Merges rules sharing a host.
///
/// Hosts are compared with surrounding whitespace removed. Rules with an
/// empty host are skipped and counted. Paths of later rules are appended
/// after those of earlier rules for the same host.
pub fn group_host_paths(rules: &[Rule]) -> HostGrouping {
    let mut by_host: BTreeMap<&str, Vec<PathRule>> = BTreeMap::new();
    let mut empty_hosts = 0;

    for rule in rules {
        let host = rule.host.trim();
        if host.is_empty() {
            empty_hosts += 1;
            continue;
        }
        by_host
            .entry(host)
            .or_default()
            .extend(rule.paths.iter().cloned());
    }

    HostGrouping {
        groups: by_host
            .into_iter()
            .map(|(host, paths)| HostGroup {
                host: host.to_string(),
                paths,
            })
            .collect(),
        empty_hosts,
    }
}
