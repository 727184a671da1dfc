use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Everything needed to run, restore and refresh one database container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseProfile {
    #[serde(default)]
    pub display_name: String,
    pub container_name: String,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,
    pub postgres_port: u16,
    pub volume_name: String,
    pub postgres_image: String,
    pub remote_db_name: String,
    pub remote_db_user: String,
    pub remote_db_key: String,
    #[serde(default)]
    pub needs_password: bool,
    pub dump_file_prefix: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub legacy_match: Option<LegacyMatch>,
}

/// How to recognise leftover containers from earlier setups of the same
/// database. Any single criterion is enough.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyMatch {
    #[serde(default)]
    pub name_contains: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub image: Option<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["timescaledb".to_string(), "postgis".to_string()]
}

impl DatabaseProfile {
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.container_name
        } else {
            &self.display_name
        }
    }
}

pub fn watchdog3() -> DatabaseProfile {
    DatabaseProfile {
        display_name: "Watchdog3".to_string(),
        container_name: "postgresql16".to_string(),
        postgres_user: "watchdog2".to_string(),
        postgres_password: "watchdog2".to_string(),
        postgres_db: "watchdog2".to_string(),
        postgres_port: 10000,
        volume_name: "pgdata16".to_string(),
        postgres_image: "timescale/timescaledb-ha:pg16-ts2.18".to_string(),
        remote_db_name: "watchdog2".to_string(),
        remote_db_user: "watchdog2".to_string(),
        remote_db_key: "wd3".to_string(),
        needs_password: false,
        dump_file_prefix: "wd3-stage-dump".to_string(),
        extensions: default_extensions(),
        legacy_match: None,
    }
}

pub fn billsen() -> DatabaseProfile {
    DatabaseProfile {
        display_name: "Billsen".to_string(),
        container_name: "billsen-db".to_string(),
        postgres_user: "billsen".to_string(),
        postgres_password: "billsen".to_string(),
        postgres_db: "billsen".to_string(),
        postgres_port: 5433,
        volume_name: "billsen_pgdata".to_string(),
        postgres_image: "postgres:16".to_string(),
        remote_db_name: "billsen".to_string(),
        remote_db_user: "billsen".to_string(),
        remote_db_key: "billsen".to_string(),
        needs_password: true,
        dump_file_prefix: "billsen-stage-dump".to_string(),
        extensions: default_extensions(),
        legacy_match: Some(LegacyMatch {
            name_contains: Some("billsen".to_string()),
            port: Some(5433),
            image: Some("postgres:16".to_string()),
        }),
    }
}

pub fn builtin_profiles() -> BTreeMap<String, DatabaseProfile> {
    BTreeMap::from([
        ("watchdog3".to_string(), watchdog3()),
        ("billsen".to_string(), billsen()),
    ])
}
