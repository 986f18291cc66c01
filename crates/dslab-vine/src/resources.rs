//! Resource model.
//!
//! Every task carries four independent resource summaries: the request made at submission, the allocation chosen for
//! the latest attempt, the usage measured during the latest attempt and the box currently held on a worker.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Named set of resource quantities.
///
/// Well-known resources have dedicated fields, anything else goes to `extra`. Absent values mean "not specified" and
/// are different from zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSummary {
    /// Number of cores, may be fractional.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<f64>,
    /// Memory in MB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    /// Disk in MB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpus: Option<f64>,
    /// Wall clock time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wall_time: Option<f64>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub extra: IndexMap<String, f64>,
}

const WELL_KNOWN: [&str; 5] = ["cores", "memory", "disk", "gpus", "wall_time"];

impl ResourceSummary {
    /// Creates an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cores(mut self, cores: f64) -> Self {
        self.cores = Some(cores);
        self
    }

    pub fn with_memory(mut self, memory: f64) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_disk(mut self, disk: f64) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn with_gpus(mut self, gpus: f64) -> Self {
        self.gpus = Some(gpus);
        self
    }

    pub fn with_wall_time(mut self, wall_time: f64) -> Self {
        self.wall_time = Some(wall_time);
        self
    }

    /// Returns the value of a resource by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "cores" => self.cores,
            "memory" => self.memory,
            "disk" => self.disk,
            "gpus" => self.gpus,
            "wall_time" => self.wall_time,
            _ => self.extra.get(name).copied(),
        }
    }

    /// Sets the value of a resource by name.
    pub fn set(&mut self, name: &str, value: f64) {
        match name {
            "cores" => self.cores = Some(value),
            "memory" => self.memory = Some(value),
            "disk" => self.disk = Some(value),
            "gpus" => self.gpus = Some(value),
            "wall_time" => self.wall_time = Some(value),
            _ => {
                self.extra.insert(name.to_string(), value);
            }
        }
    }

    /// Iterates over specified resources as (name, value) pairs, well-known resources first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        WELL_KNOWN
            .iter()
            .filter_map(move |name| self.get(name).map(|v| (*name, v)))
            .chain(self.extra.iter().map(|(name, v)| (name.as_str(), *v)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Returns names of resources whose value exceeds the corresponding value in `limits`.
    ///
    /// Resources not specified in either summary are not compared.
    pub fn exceeding(&self, limits: &ResourceSummary) -> Vec<String> {
        self.iter()
            .filter(|(name, value)| limits.get(name).map_or(false, |limit| *value > limit))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Fills resources missing here with the values from `defaults`.
    pub fn fill_missing(&mut self, defaults: &ResourceSummary) {
        for (name, value) in defaults.iter() {
            if self.get(name).is_none() {
                self.set(name, value);
            }
        }
    }
}

impl fmt::Display for ResourceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}
