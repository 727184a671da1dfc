use anyhow::Result;
use chrono::NaiveDate;
use opsbox_core::rota::RotaSource;

#[tokio::test]
async fn rota_file_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("janitor-rota.txt");
    std::fs::write(&path, "Start date\tPerson\n01/06/2025\tAlice\n01/13/2025\tBob\n")?;

    let rota = RotaSource::File(path).load().await?;
    let weeks = rota.weeks(NaiveDate::from_ymd_opt(2025, 1, 8).unwrap());
    let lines = weeks.report_lines();

    assert!(lines.contains(&"This week (6-10.01):  Alice".to_string()));
    assert!(lines.contains(&"Next week (13-17.01):  Bob".to_string()));
    Ok(())
}
