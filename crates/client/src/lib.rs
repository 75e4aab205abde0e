//! Conversation driver for casestream: the per-turn state machine, the
//! request gate, and the `casestream` command-line front end.

pub mod cli;
pub mod events;
pub mod gate;
pub mod machine;

pub use events::ChatEvent;
pub use gate::{Conversation, ConversationSnapshot, GateError, TurnReport};
pub use machine::{Effect, InvalidTransition, MachineInput, MachineSnapshot, Phase, TurnMachine};
