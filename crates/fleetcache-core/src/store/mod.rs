// ── Entity caches ──
//
// One handle type per cached entity. Handles are cheap clones over shared
// state that the apply loop mutates in place, so a handle obtained before
// an update observes the update. Every read takes the entity's lock and
// returns owned copies.

mod application;
mod branch;
mod charm;
mod machine;
mod model;
mod unit;

use std::sync::Arc;

pub use application::Application;
pub use branch::Branch;
pub use charm::Charm;
pub use machine::Machine;
pub use model::{Model, ModelReport};
pub use unit::Unit;

pub(crate) use model::ModelInner;

use crate::resident::Resident;

/// Access to the resident embedded in every entity.
pub(crate) trait Cached {
    fn resident(&self) -> &Arc<Resident>;
}
