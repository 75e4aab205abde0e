//! Shared types for casestream: configuration, the wire protocol, turn
//! bookkeeping, errors, and structured trace events.

pub mod config;
pub mod error;
pub mod frame;
pub mod stream;
pub mod trace;
pub mod turn;
