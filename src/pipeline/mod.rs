//! The per-session conversational pipeline.

pub mod controller;
pub mod generator;
pub mod messages;

pub use controller::{Session, SessionDeps, SessionHandle, SessionInput};
