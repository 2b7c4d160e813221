//! Top-level orchestration: the fusion system, the state it shares with
//! camera workers and hot-plug callbacks, and its per-tick output.

mod fusion_system;
pub mod messages;
pub mod shared_state;

pub use fusion_system::{FusionSystem, Scope};
pub use messages::TickOutput;
pub use shared_state::{SharedState, Sides};
