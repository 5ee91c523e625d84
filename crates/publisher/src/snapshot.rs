//! Equipment status snapshot consumed by the renderer.
//!
//! The snapshot is produced by the equipment/repair domain; here it is only
//! read. Providers hand out a fresh copy on every render.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use herald_common::{HeraldError, HeraldResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Green,
    Yellow,
    Red,
}

impl StatusColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusColor::Green => "green",
            StatusColor::Yellow => "yellow",
            StatusColor::Red => "red",
        }
    }
}

/// Computed health of one piece of equipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusIndicator {
    pub color: StatusColor,
    /// "Operational", "Degraded" or "Down".
    pub label: String,
    #[serde(default)]
    pub issue_description: Option<String>,
}

impl StatusIndicator {
    pub fn operational() -> Self {
        Self {
            color: StatusColor::Green,
            label: "Operational".to_string(),
            issue_description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentStatus {
    pub name: String,
    pub status: StatusIndicator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaStatus {
    pub name: String,
    #[serde(default)]
    pub equipment: Vec<EquipmentStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub areas: Vec<AreaStatus>,
}

/// Read-only source of the current status snapshot.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn snapshot(&self) -> HeraldResult<StatusSnapshot>;
}

/// Always returns the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshotProvider {
    snapshot: StatusSnapshot,
}

impl StaticSnapshotProvider {
    pub fn new(snapshot: StatusSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl SnapshotProvider for StaticSnapshotProvider {
    async fn snapshot(&self) -> HeraldResult<StatusSnapshot> {
        Ok(self.snapshot.clone())
    }
}

/// Reads the snapshot from a JSON file, re-read on every call so an external
/// exporter can refresh it between publishes.
#[derive(Debug, Clone)]
pub struct FileSnapshotProvider {
    path: PathBuf,
}

impl FileSnapshotProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotProvider for FileSnapshotProvider {
    async fn snapshot(&self) -> HeraldResult<StatusSnapshot> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            HeraldError::Delivery(format!(
                "Failed to read status snapshot {}: {e}",
                self.path.display()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            HeraldError::Delivery(format!(
                "Invalid status snapshot {}: {e}",
                self.path.display()
            ))
        })
    }
}
