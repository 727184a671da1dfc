//! Producing a fresh dump on the staging host and copying it here.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::config::RemoteDumpConfig;
use crate::error::{OpsError, Result};
use crate::postgres::profile::DatabaseProfile;
use crate::process::{CommandRunner, CommandSpec};

pub fn dump_file_name(remote_db_key: &str, at: NaiveDateTime) -> String {
    format!("{remote_db_key}-stage-dump-{}.db", at.format("%Y%m%d%H%M"))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// The shell line run on the staging host.
pub fn remote_dump_command(
    profile: &DatabaseProfile,
    remote: &RemoteDumpConfig,
    file_name: &str,
) -> Result<String> {
    let password_prefix = if profile.needs_password {
        let password = remote.password_for(&profile.remote_db_key).ok_or_else(|| {
            OpsError::Config(format!(
                "no password configured for remote database {}",
                profile.remote_db_key
            ))
        })?;
        format!("PGPASSWORD={} ", shell_quote(password))
    } else {
        String::new()
    };

    Ok(format!(
        "{password_prefix}pg_dump -h {} -U {} -Fc {} > {}/{file_name}",
        remote.db_host, profile.remote_db_user, profile.remote_db_name, remote.tmp_dir
    ))
}

pub struct RemoteDump<'a> {
    runner: &'a dyn CommandRunner,
    remote: &'a RemoteDumpConfig,
}

impl<'a> RemoteDump<'a> {
    pub fn new(runner: &'a dyn CommandRunner, remote: &'a RemoteDumpConfig) -> Self {
        Self { runner, remote }
    }

    /// Dumps the profile's remote database on the staging host, copies the
    /// file to the local destination and removes the remote copy.
    pub async fn fetch(&self, profile: &DatabaseProfile, at: NaiveDateTime) -> Result<PathBuf> {
        let host = self.remote.ssh_host.as_str();
        info!(host, "Validating SSH connection");
        let probe = self
            .runner
            .capture(&CommandSpec::new("ssh").args(["-q", host, "exit"]))
            .await?;
        if !probe.success() {
            return Err(OpsError::Remote(format!(
                "SSH connection to {host} failed, check your SSH configuration"
            )));
        }

        let file_name = dump_file_name(&profile.remote_db_key, at);
        let dump_command = remote_dump_command(profile, self.remote, &file_name)?;
        let remote_path = format!("{}/{file_name}", self.remote.tmp_dir);

        info!(host, database = %profile.remote_db_name, "Creating database dump on remote server");
        let dump = self
            .runner
            .capture(&CommandSpec::new("ssh").arg(host).arg(dump_command))
            .await?;
        if !dump.success() {
            return Err(OpsError::Remote(format!(
                "remote database dump failed: {}",
                dump.stderr.trim()
            )));
        }
        info!(path = %remote_path, "Remote dump created");

        let destination = self.remote.local_destination.to_string_lossy().into_owned();
        info!(destination = %destination, "Transferring dump file to local machine");
        let copy = self
            .runner
            .capture(&CommandSpec::new("scp").args([format!("{host}:{remote_path}"), destination]))
            .await?;
        if !copy.success() {
            return Err(OpsError::Remote(format!(
                "file transfer failed: {}",
                copy.stderr.trim()
            )));
        }

        let cleanup = self
            .runner
            .capture(&CommandSpec::new("ssh").arg(host).arg(format!("rm {remote_path}")))
            .await?;
        if cleanup.success() {
            info!("Cleaned up remote temporary file");
        } else {
            warn!(path = %remote_path, "Unable to delete remote temporary file");
        }

        let local = self.remote.local_destination.join(&file_name);
        info!(file = %file_name, "Latest dump fetched");
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postgres::profile::{billsen, watchdog3};
    use crate::process::{CommandOutput, ScriptedRunner};
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap()
    }

    #[test]
    fn file_name_carries_minute_timestamp() {
        assert_eq!(dump_file_name("wd3", at()), "wd3-stage-dump-202403070905.db");
    }

    #[test]
    fn password_is_required_only_when_profile_needs_it() {
        let mut remote = RemoteDumpConfig::default();
        let cmd = remote_dump_command(&watchdog3(), &remote, "f.db").unwrap();
        assert_eq!(cmd, "pg_dump -h 127.0.0.1 -U watchdog2 -Fc watchdog2 > /tmp/f.db");

        let err = remote_dump_command(&billsen(), &remote, "f.db").unwrap_err();
        assert!(matches!(err, OpsError::Config(msg) if msg.contains("billsen")));

        remote.passwords.insert("billsen".into(), "it's".into());
        let cmd = remote_dump_command(&billsen(), &remote, "f.db").unwrap();
        assert!(cmd.starts_with(r"PGPASSWORD='it'\''s' pg_dump -h 127.0.0.1 -U billsen"));
    }

    #[tokio::test]
    async fn fetch_runs_probe_dump_copy_and_cleanup() {
        let runner = ScriptedRunner::new().on("ssh sstagedb1nur rm", CommandOutput::failed(1, "nope"));
        let remote = RemoteDumpConfig::default();
        let path = RemoteDump::new(&runner, &remote)
            .fetch(&watchdog3(), at())
            .await
            .unwrap();

        assert_eq!(path, PathBuf::from("./wd3-stage-dump-202403070905.db"));
        assert_eq!(
            runner.calls(),
            vec![
                "ssh -q sstagedb1nur exit",
                "ssh sstagedb1nur 'pg_dump -h 127.0.0.1 -U watchdog2 -Fc watchdog2 > /tmp/wd3-stage-dump-202403070905.db'",
                "scp sstagedb1nur:/tmp/wd3-stage-dump-202403070905.db ./",
                "ssh sstagedb1nur 'rm /tmp/wd3-stage-dump-202403070905.db'",
            ]
        );
    }

    #[tokio::test]
    async fn failed_ssh_probe_stops_before_dumping() {
        let runner = ScriptedRunner::new().on("ssh -q", CommandOutput::failed(255, ""));
        let remote = RemoteDumpConfig::default();
        let err = RemoteDump::new(&runner, &remote)
            .fetch(&watchdog3(), at())
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::Remote(_)));
        assert_eq!(runner.calls().len(), 1);
    }
}
