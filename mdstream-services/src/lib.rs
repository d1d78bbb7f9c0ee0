//! Session orchestration for mdstream
//!
//! Ties the token source, endpoint discovery and stream sessions together:
//! authenticates, spawns one session (or a hot-standby pair), keeps the token
//! renewed across all sessions and drives reconnects.

pub mod orchestrator;
pub mod spawner;

pub use orchestrator::{OrchestratorConfig, OrchestratorError, SessionOrchestrator};
pub use spawner::{SessionSpawner, WebSocketSpawner};
