// ── Snapshot model ──
//
// Plain data carried by the change stream. The cache keeps the last
// applied snapshot of each entity and hands out copies.

pub mod change;
pub mod common;

pub use change::{
    ApplicationChange, BranchChange, Change, CharmChange, MachineChange, ModelChange,
    RemoveApplication, RemoveBranch, RemoveCharm, RemoveMachine, RemoveModel, RemoveUnit,
    UnitChange,
};
pub use common::{ConfigMap, ItemChange, Life, LxdProfile, Port, Status, StatusInfo};
