// src/engine/mod.rs

//! Engine wiring: the evaluation loop and the webhook broadcaster.

pub mod broadcast;
pub mod runtime;

pub use broadcast::Broadcaster;
pub use runtime::{Engine, EngineConfig, EngineState};
