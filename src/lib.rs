pub mod api;
pub mod coordinator;
pub mod derived;
pub mod intake;
pub mod model;

pub use api::{Client, Error};
pub use coordinator::{Coordinator, CoordinatorState, CycleOutcome};
