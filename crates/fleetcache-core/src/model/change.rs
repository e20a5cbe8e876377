// ── Change and removal events ──
//
// The producer pushes one of these per entity into the controller's input
// channel. Change structs carry a full snapshot; removals carry only the
// natural key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::common::{ConfigMap, ItemChange, Life, LxdProfile, Port, StatusInfo};

// ── Model ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelChange {
    pub model_uuid: String,
    pub name: String,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub is_controller: bool,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub status: StatusInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveModel {
    pub model_uuid: String,
}

// ── Application ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationChange {
    pub model_uuid: String,
    pub name: String,
    #[serde(default)]
    pub exposed: bool,
    #[serde(default)]
    pub charm_url: String,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub min_units: u32,
    #[serde(default)]
    pub subordinate: bool,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub status: StatusInfo,
    #[serde(default)]
    pub workload_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveApplication {
    pub model_uuid: String,
    pub name: String,
}

// ── Charm ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharmChange {
    pub model_uuid: String,
    pub charm_url: String,
    #[serde(default)]
    pub charm_version: String,
    #[serde(default)]
    pub lxd_profile: LxdProfile,
    #[serde(default)]
    pub default_config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveCharm {
    pub model_uuid: String,
    pub charm_url: String,
}

// ── Machine ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineChange {
    pub model_uuid: String,
    pub id: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub agent_status: StatusInfo,
    #[serde(default)]
    pub instance_status: StatusInfo,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub series: String,
    #[serde(default)]
    pub container_type: String,
    #[serde(default)]
    pub supported_containers: Vec<String>,
    #[serde(default)]
    pub supported_containers_known: bool,
    #[serde(default)]
    pub charm_profiles: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub has_vote: bool,
    #[serde(default)]
    pub wants_vote: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMachine {
    pub model_uuid: String,
    pub id: String,
}

// ── Unit ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitChange {
    pub model_uuid: String,
    pub name: String,
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub series: String,
    #[serde(default)]
    pub charm_url: String,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub public_address: String,
    #[serde(default)]
    pub private_address: String,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub principal: String,
    #[serde(default)]
    pub subordinate: bool,
    #[serde(default)]
    pub workload_status: StatusInfo,
    #[serde(default)]
    pub agent_status: StatusInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveUnit {
    pub model_uuid: String,
    pub name: String,
}

// ── Branch ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchChange {
    pub model_uuid: String,
    pub id: String,
    pub name: String,
    /// Application name -> units tracking the branch.
    #[serde(default)]
    pub assigned_units: BTreeMap<String, Vec<String>>,
    /// Application name -> pending config deltas.
    #[serde(default)]
    pub config: BTreeMap<String, Vec<ItemChange>>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub completed: i64,
    #[serde(default)]
    pub completed_by: String,
    #[serde(default)]
    pub generation_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveBranch {
    pub model_uuid: String,
    pub id: String,
}

// ── Change ───────────────────────────────────────────────────────────

/// Every event the apply loop understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Change {
    Model(ModelChange),
    RemoveModel(RemoveModel),
    Application(ApplicationChange),
    RemoveApplication(RemoveApplication),
    Charm(CharmChange),
    RemoveCharm(RemoveCharm),
    Machine(MachineChange),
    RemoveMachine(RemoveMachine),
    Unit(UnitChange),
    RemoveUnit(RemoveUnit),
    Branch(BranchChange),
    RemoveBranch(RemoveBranch),
}

impl Change {
    /// The model this event addresses.
    pub fn model_uuid(&self) -> &str {
        match self {
            Self::Model(c) => &c.model_uuid,
            Self::RemoveModel(r) => &r.model_uuid,
            Self::Application(c) => &c.model_uuid,
            Self::RemoveApplication(r) => &r.model_uuid,
            Self::Charm(c) => &c.model_uuid,
            Self::RemoveCharm(r) => &r.model_uuid,
            Self::Machine(c) => &c.model_uuid,
            Self::RemoveMachine(r) => &r.model_uuid,
            Self::Unit(c) => &c.model_uuid,
            Self::RemoveUnit(r) => &r.model_uuid,
            Self::Branch(c) => &c.model_uuid,
            Self::RemoveBranch(r) => &r.model_uuid,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            Self::RemoveModel(_)
                | Self::RemoveApplication(_)
                | Self::RemoveCharm(_)
                | Self::RemoveMachine(_)
                | Self::RemoveUnit(_)
                | Self::RemoveBranch(_)
        )
    }

    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Model(_) => "model",
            Self::RemoveModel(_) => "remove-model",
            Self::Application(_) => "application",
            Self::RemoveApplication(_) => "remove-application",
            Self::Charm(_) => "charm",
            Self::RemoveCharm(_) => "remove-charm",
            Self::Machine(_) => "machine",
            Self::RemoveMachine(_) => "remove-machine",
            Self::Unit(_) => "unit",
            Self::RemoveUnit(_) => "remove-unit",
            Self::Branch(_) => "branch",
            Self::RemoveBranch(_) => "remove-branch",
        }
    }

    /// Position of a removal in a sweep. Children go before their parents:
    /// units, machines, applications, charms, branches, then models.
    pub(crate) fn sweep_rank(&self) -> u8 {
        match self {
            Self::RemoveUnit(_) | Self::Unit(_) => 0,
            Self::RemoveMachine(_) | Self::Machine(_) => 1,
            Self::RemoveApplication(_) | Self::Application(_) => 2,
            Self::RemoveCharm(_) | Self::Charm(_) => 3,
            Self::RemoveBranch(_) | Self::Branch(_) => 4,
            Self::RemoveModel(_) | Self::Model(_) => 5,
        }
    }
}

macro_rules! impl_from_for_change {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Change {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_for_change! {
    ModelChange => Model,
    RemoveModel => RemoveModel,
    ApplicationChange => Application,
    RemoveApplication => RemoveApplication,
    CharmChange => Charm,
    RemoveCharm => RemoveCharm,
    MachineChange => Machine,
    RemoveMachine => RemoveMachine,
    UnitChange => Unit,
    RemoveUnit => RemoveUnit,
    BranchChange => Branch,
    RemoveBranch => RemoveBranch,
}
