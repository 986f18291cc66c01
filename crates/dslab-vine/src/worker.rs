//! Manager-side view of a worker.

use std::collections::HashSet;

use serde::Serialize;

use crate::resources::ResourceSummary;

pub type WorkerId = u64;

/// What the manager knows about a connected worker.
///
/// The core never picks workers itself, it only keeps what the transport layer reported so that lifecycle decisions
/// (e.g. fixed location checks) can be made.
#[derive(Clone, Debug, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub hostname: String,
    pub addrport: String,
    pub resources: ResourceSummary,
    pub features: HashSet<String>,
    /// Cached names of the files present in the worker cache.
    pub cached_files: HashSet<String>,
}

impl WorkerInfo {
    pub fn new(hostname: &str, addrport: &str, resources: ResourceSummary) -> Self {
        Self {
            id: 0,
            hostname: hostname.to_string(),
            addrport: addrport.to_string(),
            resources,
            features: HashSet::new(),
            cached_files: HashSet::new(),
        }
    }

    pub fn has_file(&self, cached_name: &str) -> bool {
        self.cached_files.contains(cached_name)
    }
}
