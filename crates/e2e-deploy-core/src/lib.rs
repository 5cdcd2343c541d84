pub mod clock;
pub mod command;
pub mod config;
pub mod credentials;
pub mod error;
pub mod health;
pub mod infra;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod reconcile;
pub mod release;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use error::{DeployError, Result};
