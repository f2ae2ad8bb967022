//! Partition kinds and versioned partition names.
//!
//! Every partition name carries the version suffix, so two code versions
//! never share a partition and activation can drop exactly the old ones.

use serde::{Deserialize, Serialize};

use crate::config::PartitionConfig;

/// The three logical partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionKind {
    /// Warm-up set: the application shell.
    AppShell,
    /// Generic images and opportunistically cached responses.
    Image,
    /// Sprite variants.
    Sprite,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 3] = [
        PartitionKind::AppShell,
        PartitionKind::Image,
        PartitionKind::Sprite,
    ];
}

impl std::fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionKind::AppShell => write!(f, "app-shell"),
            PartitionKind::Image => write!(f, "image"),
            PartitionKind::Sprite => write!(f, "sprite"),
        }
    }
}

/// Names of the current generation's partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
    app_shell: String,
    image: String,
    sprite: String,
}

impl PartitionNames {
    /// `<prefix>-<version>` for each partition.
    pub fn new(version: &str, app_shell: &str, image: &str, sprite: &str) -> Self {
        Self {
            app_shell: format!("{app_shell}-{version}"),
            image: format!("{image}-{version}"),
            sprite: format!("{sprite}-{version}"),
        }
    }

    pub fn from_config(config: &PartitionConfig) -> Self {
        Self::new(
            &config.version,
            &config.app_shell,
            &config.images,
            &config.sprites,
        )
    }

    pub fn name(&self, kind: PartitionKind) -> &str {
        match kind {
            PartitionKind::AppShell => &self.app_shell,
            PartitionKind::Image => &self.image,
            PartitionKind::Sprite => &self.sprite,
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.app_shell, &self.image, &self.sprite]
    }

    /// Whether `name` belongs to the current generation.
    pub fn is_current(&self, name: &str) -> bool {
        self.all().contains(&name)
    }
}

impl Default for PartitionNames {
    fn default() -> Self {
        Self::from_config(&PartitionConfig::default())
    }
}
