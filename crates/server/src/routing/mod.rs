//! Route matching and selection.
//!
//! Routing is read-mostly: every inbound proxy request lists the route
//! catalog, filters it down to enabled routes whose pattern matches the
//! path, and orders the survivors by pattern priority. The caller then
//! walks that order looking for a live, enabled client.

pub mod pattern;

use crate::store::RouteRecord;

/// Enabled routes matching `path`, ordered by descending pattern priority.
///
/// Ties may break arbitrarily; selection within one priority bucket is
/// deterministic for a given catalog ordering but not load-balanced.
pub fn match_routes(routes: Vec<RouteRecord>, path: &str) -> Vec<RouteRecord> {
    let mut matched: Vec<RouteRecord> = routes
        .into_iter()
        .filter(|route| route.enabled && pattern::matches(&route.url_pattern, path))
        .collect();

    matched.sort_by(|a, b| {
        pattern::priority(&b.url_pattern).cmp(&pattern::priority(&a.url_pattern))
    });

    matched
}
