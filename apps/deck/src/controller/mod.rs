//! Controller layer: UI events, the deck state machine, and command orchestration.

pub mod events;
pub mod orchestration;
pub mod state;
