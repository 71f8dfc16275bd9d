//! Snapshot comparison
//!
//! Targets are compared by name only: a target whose configuration changed under
//! the same name appears in neither list.

use std::collections::HashMap;

use gantry_api::{TargetConfig, TargetOperation};

/// Compute the operation turning `previous` into `current`.
///
/// `add` carries the full current configuration of every new name, `del` the
/// names that disappeared. Both lists are sorted by name.
pub fn diff(
    previous: &HashMap<String, TargetConfig>,
    current: &HashMap<String, TargetConfig>,
) -> TargetOperation {
    let mut added: Vec<(&String, &TargetConfig)> = current
        .iter()
        .filter(|(name, _)| !previous.contains_key(*name))
        .collect();
    added.sort_by(|a, b| a.0.cmp(b.0));

    let mut del: Vec<String> = previous
        .keys()
        .filter(|name| !current.contains_key(*name))
        .cloned()
        .collect();
    del.sort();

    TargetOperation {
        add: added.into_iter().map(|(_, tc)| tc.clone()).collect(),
        del,
    }
}
