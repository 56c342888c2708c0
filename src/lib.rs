//! contextperm - context-sensitive permission decisions
//!
//! A decision cache keyed by subject and evaluation contexts, kept fresh by
//! session lifecycle events (login, disconnect, world change, respawn).
//! It exposes all modules for testing purposes.

pub mod bus;
pub mod cache;
pub mod command;
pub mod console;
pub mod context;
pub mod engine;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod lifecycle;
pub mod policy;
pub mod sender;
pub mod session;
pub mod settings;
pub mod subject;
