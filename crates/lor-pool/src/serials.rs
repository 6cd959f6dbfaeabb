//! Per-site causal serial bookkeeping.
//!
//! Serials are opaque strings compared lexicographically. A missing or empty
//! stored serial sorts before everything, so the first operation from a site
//! is always admissible. The stored serial is a monotone high-water mark: it
//! is raised on every observed operation, including ones whose payload is
//! skipped for ordering.

use std::collections::HashMap;

/// Map of site code to the highest serial observed from that site.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SiteSerials(HashMap<String, String>);

impl SiteSerials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation with `incoming` from `site_code` is causally
    /// admissible: either the site was never seen, or the serial is strictly
    /// greater than the stored high-water mark.
    pub fn can_apply(&self, site_code: &str, incoming: &str) -> bool {
        match self.0.get(site_code) {
            None => true,
            Some(existing) if existing.is_empty() => true,
            Some(existing) => incoming > existing.as_str(),
        }
    }

    /// Raise the high-water mark for `site_code` to `incoming` if it is
    /// higher. Called for every observed operation, applied or not.
    pub fn observe(&mut self, site_code: &str, incoming: &str) {
        match self.0.get_mut(site_code) {
            Some(existing) => {
                if incoming > existing.as_str() {
                    *existing = incoming.to_string();
                }
            }
            None => {
                self.0.insert(site_code.to_string(), incoming.to_string());
            }
        }
    }

    /// Wholesale replacement from a snapshot state.
    pub fn replace_all(&mut self, serials: HashMap<String, String>) {
        self.0 = serials;
    }

    /// Stored high-water mark for a site.
    pub fn get(&self, site_code: &str) -> Option<&str> {
        self.0.get(site_code).map(String::as_str)
    }
}

/// Per-entry LWW comparison: the incoming serial wins iff it is strictly
/// greater, with missing serials treated as empty. Two missing serials
/// compare equal, so the incoming write does not apply.
pub fn can_apply_entry(incoming: Option<&str>, existing: Option<&str>) -> bool {
    incoming.unwrap_or("") > existing.unwrap_or("")
}
