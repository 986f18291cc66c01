use std::fs::File;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resources::ResourceSummary;

/// Source of default resource requests for task categories.
pub trait CategoryDefaults {
    /// Returns the resources to request for a task of the category that didn't specify any.
    fn default_request(&self, category: &str) -> Option<ResourceSummary>;
}

/// Fixed table of category defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CategoryTable {
    categories: IndexMap<String, ResourceSummary>,
}

impl CategoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, category: &str, resources: ResourceSummary) {
        self.categories.insert(category.to_string(), resources);
    }
}

impl CategoryDefaults for CategoryTable {
    fn default_request(&self, category: &str) -> Option<ResourceSummary> {
        self.categories.get(category).cloned()
    }
}

fn default_max_library_failures() -> i32 {
    15
}

/// YAML-serializable config
#[derive(Clone, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub max_retries: i32,
    #[serde(default)]
    pub max_forsaken: i32,
    #[serde(default = "default_max_library_failures")]
    pub max_library_failures: i32,
    #[serde(default)]
    pub group_temp_files: bool,
    #[serde(default)]
    pub categories: IndexMap<String, ResourceSummary>,
}

/// Manager-wide policy. It implements Default trait, so that you can create default config and change only the
/// fields you need.
pub struct ManagerConfig {
    /// Applied to tasks that don't set their own limit, values less than one mean unlimited.
    pub max_retries: i32,
    /// Applied to tasks that don't set their own limit, values less than one mean unlimited.
    pub max_forsaken: i32,
    /// Instance failures after which a library is no longer instantiated, values less than one mean unlimited.
    pub max_library_failures: i32,
    /// Assign locality groups following temporary file dependencies.
    pub group_temp_files: bool,
    pub categories: Box<dyn CategoryDefaults>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            max_forsaken: 0,
            max_library_failures: default_max_library_failures(),
            group_temp_files: false,
            categories: Box::new(CategoryTable::new()),
        }
    }
}

impl ManagerConfig {
    pub fn from_raw(raw: RawConfig) -> Self {
        let mut categories = CategoryTable::new();
        for (name, resources) in raw.categories {
            categories.set(&name, resources);
        }
        Self {
            max_retries: raw.max_retries,
            max_forsaken: raw.max_forsaken,
            max_library_failures: raw.max_library_failures,
            group_temp_files: raw.group_temp_files,
            categories: Box::new(categories),
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(Self::from_raw(serde_yaml::from_str(s)?))
    }

    pub fn from_yaml(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        Ok(Self::from_raw(serde_yaml::from_reader(f)?))
    }
}
