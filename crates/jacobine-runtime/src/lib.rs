//! Consumer Runtime (C5): the stage trait, the dependency bundle every
//! stage gets, and the loop that binds a queue and drives deliveries
//! through a stage one at a time.

mod deps;
mod runtime;
mod stage;

pub use deps::StageDeps;
pub use runtime::ConsumerRuntime;
pub use stage::{Disposition, Stage};
