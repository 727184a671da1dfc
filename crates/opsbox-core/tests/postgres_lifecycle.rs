use std::time::Duration;

use anyhow::Result;
use opsbox_core::config::RemoteDumpConfig;
use opsbox_core::postgres::profile::watchdog3;
use opsbox_core::postgres::PostgresManager;
use opsbox_core::process::{CommandOutput, ScriptedRunner};
use opsbox_core::prompt::ScriptedPrompter;

fn running_watchdog() -> ScriptedRunner {
    ScriptedRunner::new()
        .on("docker ps", CommandOutput::ok("postgresql16\n"))
        .on("docker volume ls", CommandOutput::ok("pgdata16\nother\n"))
}

#[tokio::test]
async fn restore_copies_dump_then_runs_pg_restore_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dump = dir.path().join("wd3-stage-dump-202501061200.db");
    std::fs::write(&dump, b"PGDMP")?;

    let runner = running_watchdog();
    let profile = watchdog3();
    let remote = RemoteDumpConfig::default();
    let manager = PostgresManager::new(&runner, &profile, &remote)
        .with_readiness(3, Duration::ZERO)
        .with_search_dirs(dir.path(), None);
    let mut prompter = ScriptedPrompter::new(["n"]);

    let outcome = manager
        .restore(Some(dump.as_path()), &mut prompter)
        .await?
        .expect("restore should not be cancelled");

    assert!(outcome.clean);
    assert!(!outcome.dump_deleted);
    assert!(dump.exists());

    let calls = runner.calls();
    let copy = format!("docker cp {} postgresql16:/tmp/dbdump.db", dump.display());
    let restore = "docker exec postgresql16 pg_restore --clean --no-owner -U watchdog2 -d watchdog2 --verbose /tmp/dbdump.db";
    let copy_at = calls.iter().position(|c| c == &copy).expect("dump copied");
    let restore_at = calls.iter().position(|c| c == restore).expect("pg_restore run");
    assert!(copy_at < restore_at);
    assert_eq!(runner.calls_starting_with("docker exec postgresql16 pg_restore").len(), 1);
    assert_eq!(runner.calls_starting_with("docker restart postgresql16").len(), 1);
    Ok(())
}

#[tokio::test]
async fn restore_with_warnings_still_offers_dump_deletion() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dump = dir.path().join("wd3-stage-dump-202501061200.db");
    std::fs::write(&dump, b"PGDMP")?;

    let runner = running_watchdog().on("docker exec postgresql16 pg_restore", CommandOutput::failed(1, ""));
    let profile = watchdog3();
    let remote = RemoteDumpConfig::default();
    let manager = PostgresManager::new(&runner, &profile, &remote)
        .with_readiness(3, Duration::ZERO)
        .with_search_dirs(dir.path(), None);
    let mut prompter = ScriptedPrompter::new(["y"]);

    let outcome = manager
        .restore(Some(dump.as_path()), &mut prompter)
        .await?
        .expect("restore should not be cancelled");

    assert!(!outcome.clean);
    assert!(outcome.dump_deleted);
    assert!(!dump.exists());
    Ok(())
}

#[tokio::test]
async fn restore_of_missing_dump_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let runner = running_watchdog();
    let profile = watchdog3();
    let remote = RemoteDumpConfig::default();
    let manager = PostgresManager::new(&runner, &profile, &remote).with_search_dirs(dir.path(), None);
    let mut prompter = ScriptedPrompter::default();

    let err = manager
        .restore(Some(std::path::Path::new("nope.db")), &mut prompter)
        .await
        .unwrap_err();

    assert!(matches!(err, opsbox_core::OpsError::NotFound(_)));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn reset_aborts_when_container_name_does_not_match() -> Result<()> {
    let runner = running_watchdog();
    let profile = watchdog3();
    let remote = RemoteDumpConfig::default();
    let manager = PostgresManager::new(&runner, &profile, &remote);
    let mut prompter = ScriptedPrompter::new(["yes", "postgres16"]);

    assert!(!manager.reset(&mut prompter).await?);
    assert!(runner.calls_starting_with("docker rm").is_empty());
    assert!(runner.calls_starting_with("docker volume rm").is_empty());
    Ok(())
}

#[tokio::test]
async fn reset_aborts_without_typed_yes() -> Result<()> {
    let runner = running_watchdog();
    let profile = watchdog3();
    let remote = RemoteDumpConfig::default();
    let manager = PostgresManager::new(&runner, &profile, &remote);
    let mut prompter = ScriptedPrompter::new(["y"]);

    assert!(!manager.reset(&mut prompter).await?);
    assert!(runner.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn confirmed_reset_removes_container_and_volume() -> Result<()> {
    let runner = running_watchdog();
    let profile = watchdog3();
    let remote = RemoteDumpConfig::default();
    let manager = PostgresManager::new(&runner, &profile, &remote);
    let mut prompter = ScriptedPrompter::new(["yes", "postgresql16", "n"]);

    assert!(manager.reset(&mut prompter).await?);
    assert_eq!(runner.calls_starting_with("docker rm -f"), vec!["docker rm -f postgresql16"]);
    assert_eq!(runner.calls_starting_with("docker volume rm"), vec!["docker volume rm pgdata16"]);
    assert_eq!(prompter.remaining(), 0);
    Ok(())
}
