// ── Common types shared across the snapshot model ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Free-form configuration attached to models, applications and machines.
///
/// Key-sorted so the JSON encoding (and therefore every config hash) is
/// canonical regardless of the order the producer emitted the keys in.
pub type ConfigMap = BTreeMap<String, serde_json::Value>;

/// Lifecycle stage of an entity in the authoritative store.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Life {
    #[default]
    Alive,
    Dying,
    Dead,
}

/// Workload, agent or instance status value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum Status {
    Active,
    Allocating,
    Blocked,
    Error,
    Executing,
    Idle,
    Maintenance,
    Pending,
    Running,
    Started,
    Stopped,
    Waiting,
    #[default]
    Unknown,
}

/// A status value with its message and the time it was set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub status: Status,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

/// An opened network port on a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub protocol: String,
    pub number: u16,
}

impl Port {
    pub fn tcp(number: u16) -> Self {
        Self {
            protocol: "tcp".into(),
            number,
        }
    }
}

/// LXD profile shipped with a charm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LxdProfile {
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub devices: BTreeMap<String, BTreeMap<String, String>>,
}

impl LxdProfile {
    /// A profile with neither config nor devices has no effect on a machine.
    pub fn is_empty(&self) -> bool {
        self.config.is_empty() && self.devices.is_empty()
    }
}

/// One key's pending change inside a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ItemChange {
    Add {
        key: String,
        new: serde_json::Value,
    },
    Modify {
        key: String,
        old: serde_json::Value,
        new: serde_json::Value,
    },
    Delete {
        key: String,
        old: serde_json::Value,
    },
}

impl ItemChange {
    pub fn key(&self) -> &str {
        match self {
            Self::Add { key, .. } | Self::Modify { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}
