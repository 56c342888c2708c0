#![allow(dead_code)]

pub mod builders;
pub mod engine;

pub use builders::{Harness, HarnessBuilder, NamePlatform};
pub use engine::{CountingEngine, Rule};
