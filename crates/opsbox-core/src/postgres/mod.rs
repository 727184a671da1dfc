//! PostgreSQL container management: profiles, dump discovery, remote dump
//! fetching and the container lifecycle.

pub mod dumps;
pub mod manager;
pub mod profile;
pub mod remote;

pub use manager::{ContainerState, PostgresManager, RestoreOutcome, StartOutcome};
pub use profile::{builtin_profiles, DatabaseProfile, LegacyMatch};
