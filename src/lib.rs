#[macro_use]
extern crate log;

pub mod chain;
pub mod config;
pub mod error;
pub mod node;
pub mod tx;
