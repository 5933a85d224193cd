//! Infrastructure Layer
//!
//! Process lifecycle and signal handling.

pub mod lifecycle;

pub use lifecycle::{wait_for_signal, LifecycleController, LifecycleState, ShutdownTrigger};
