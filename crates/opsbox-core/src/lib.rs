pub mod error;
pub mod config;
pub mod process;
pub mod docker;
pub mod prompt;
pub mod interrupt;
pub mod postgres;
pub mod cleanup;
pub mod broker;
pub mod rota;
pub mod notify;

pub use config::OpsConfig;
pub use error::{OpsError, Result};
