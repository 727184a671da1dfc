//! Weekly duty rota: parsing the schedule and finding this week's and next
//! week's assignment.

use std::path::Path;
use std::time::Duration;

use chrono::{Datelike, Days, NaiveDate};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{OpsError, Result};

const DATE_FORMAT: &str = "%m/%d/%Y";
/// A rota window runs Monday to Friday: the start day plus four days.
const WINDOW_DAYS: u64 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotaEntry {
    pub start: NaiveDate,
    pub person: String,
}

impl RotaEntry {
    pub fn end(&self) -> NaiveDate {
        self.start
            .checked_add_days(Days::new(WINDOW_DAYS))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end()
    }

    pub fn date_range(&self) -> String {
        format_date_range(self.start, self.end())
    }
}

const START_COLUMN: &str = "Start date";
const PERSON_COLUMN: &str = "Person";

/// Short rows leave the missing cells empty.
#[derive(Debug, Deserialize)]
struct RotaRow {
    #[serde(rename = "Start date", default)]
    start: String,
    #[serde(rename = "Person", default)]
    person: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rota {
    entries: Vec<RotaEntry>,
}

/// Assignments covering `today` and the one after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotaWeeks {
    pub current: Option<RotaEntry>,
    pub next: Option<RotaEntry>,
}

impl Rota {
    pub fn new(mut entries: Vec<RotaEntry>) -> Self {
        entries.sort_by_key(|entry| entry.start);
        Self { entries }
    }

    /// Tab-separated text with `Start date` (`MM/DD/YYYY`) and `Person`
    /// columns. Extra columns are ignored.
    pub fn parse_tsv(content: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = reader.headers()?;
        for column in [START_COLUMN, PERSON_COLUMN] {
            if !headers.iter().any(|header| header == column) {
                return Err(OpsError::InvalidInput(format!(
                    "rota is missing the '{column}' column"
                )));
            }
        }

        let mut entries = Vec::new();
        for (index, row) in reader.deserialize::<RotaRow>().enumerate() {
            let row = row?;
            if row.start.is_empty() && row.person.is_empty() {
                continue;
            }
            let start = NaiveDate::parse_from_str(&row.start, DATE_FORMAT).map_err(|err| {
                OpsError::InvalidInput(format!(
                    "rota row {}: bad start date '{}': {err}",
                    index + 2,
                    row.start
                ))
            })?;
            entries.push(RotaEntry {
                start,
                person: row.person,
            });
        }
        debug!(entries = entries.len(), "Parsed rota");
        Ok(Self::new(entries))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            OpsError::NotFound(format!("rota file '{}': {err}", path.display()))
        })?;
        Self::parse_tsv(&content)
    }

    pub fn entries(&self) -> &[RotaEntry] {
        &self.entries
    }

    /// The first window containing `today` and the entry that follows it.
    /// Without a current window there is no next one either.
    pub fn weeks(&self, today: NaiveDate) -> RotaWeeks {
        match self.entries.iter().position(|entry| entry.contains(today)) {
            Some(index) => RotaWeeks {
                current: self.entries.get(index).cloned(),
                next: self.entries.get(index + 1).cloned(),
            },
            None => RotaWeeks::default(),
        }
    }
}

/// `D-D.MM` within one month, `D.MM-D.MM` across months.
pub fn format_date_range(start: NaiveDate, end: NaiveDate) -> String {
    if start.month() == end.month() {
        format!("{}-{}.{:02}", start.day(), end.day(), start.month())
    } else {
        format!(
            "{}.{:02}-{}.{:02}",
            start.day(),
            start.month(),
            end.day(),
            end.month()
        )
    }
}

impl RotaWeeks {
    /// Plain text report used by `opsbox rota`.
    pub fn report_lines(&self) -> Vec<String> {
        let mut lines = vec!["Janitor ROTA".to_string(), "=".repeat(40)];
        match &self.current {
            Some(entry) => lines.push(format!("This week ({}):  {}", entry.date_range(), entry.person)),
            None => lines.push("This week:  No assignment found".to_string()),
        }
        match &self.next {
            Some(entry) => lines.push(format!("Next week ({}):  {}", entry.date_range(), entry.person)),
            None => lines.push("Next week:  No assignment found".to_string()),
        }
        lines.push("=".repeat(40));
        lines
    }
}

pub fn spreadsheet_export_url(spreadsheet_id: &str, gid: Option<&str>) -> String {
    let mut url = format!("https://docs.google.com/spreadsheets/d/{spreadsheet_id}/export?format=tsv");
    if let Some(gid) = gid {
        url.push_str("&gid=");
        url.push_str(gid);
    }
    url
}

/// Downloads the sheet as TSV and parses it.
pub async fn fetch_spreadsheet(spreadsheet_id: &str, gid: Option<&str>) -> Result<Rota> {
    let url = spreadsheet_export_url(spreadsheet_id, gid);
    info!(spreadsheet_id, "Fetching rota spreadsheet");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let response = client.get(&url).send().await?;
    if response.status() != StatusCode::OK {
        return Err(OpsError::Remote(format!(
            "spreadsheet export returned status {}",
            response.status()
        )));
    }
    let body = response.text().await?;
    Rota::parse_tsv(&body)
}

/// Where the rota is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotaSource {
    File(std::path::PathBuf),
    Spreadsheet { id: String, gid: Option<String> },
}

impl RotaSource {
    pub async fn load(&self) -> Result<Rota> {
        match self {
            RotaSource::File(path) => Rota::from_file(path),
            RotaSource::Spreadsheet { id, gid } => fetch_spreadsheet(id, gid.as_deref()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "Start date\tPerson\tNotes\n\
                         01/13/2025\tBob\t\n\
                         01/06/2025\tAlice\tfirst\n\
                         01/27/2025\tDana\t\n\
                         01/20/2025\tCarol\t\n";

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn rows_are_sorted_by_start_date() {
        let rota = Rota::parse_tsv(SHEET).unwrap();
        let people: Vec<&str> = rota.entries().iter().map(|e| e.person.as_str()).collect();
        assert_eq!(people, vec!["Alice", "Bob", "Carol", "Dana"]);
    }

    #[test]
    fn window_includes_friday_but_not_weekend() {
        let rota = Rota::parse_tsv(SHEET).unwrap();

        let friday = rota.weeks(day(2025, 1, 17));
        assert_eq!(friday.current.unwrap().person, "Bob");
        assert_eq!(friday.next.unwrap().person, "Carol");

        let saturday = rota.weeks(day(2025, 1, 18));
        assert_eq!(saturday, RotaWeeks::default());
    }

    #[test]
    fn last_entry_has_no_next() {
        let rota = Rota::parse_tsv(SHEET).unwrap();
        let weeks = rota.weeks(day(2025, 1, 27));
        assert_eq!(weeks.current.unwrap().person, "Dana");
        assert!(weeks.next.is_none());
    }

    #[test]
    fn date_ranges_collapse_within_a_month() {
        assert_eq!(format_date_range(day(2025, 1, 6), day(2025, 1, 10)), "6-10.01");
        assert_eq!(format_date_range(day(2025, 1, 30), day(2025, 2, 3)), "30.01-3.02");
    }

    #[test]
    fn bad_dates_are_reported_with_row() {
        let err = Rota::parse_tsv("Start date\tPerson\n2025-01-06\tAlice\n").unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn blank_rows_are_skipped() {
        let sheet = "Start date\tPerson\n01/06/2025\tAlice\n\t\n   \n\n";
        let rota = Rota::parse_tsv(sheet).unwrap();
        assert_eq!(rota.entries().len(), 1);
    }

    #[test]
    fn missing_person_column_is_reported() {
        let err = Rota::parse_tsv("Start date\tName\n01/06/2025\tAlice\n").unwrap_err();
        assert!(matches!(err, OpsError::InvalidInput(msg) if msg.contains("'Person'")));
    }

    #[test]
    fn report_shows_missing_assignments() {
        let lines = RotaWeeks::default().report_lines();
        assert!(lines.contains(&"This week:  No assignment found".to_string()));
        assert!(lines.contains(&"Next week:  No assignment found".to_string()));
    }

    #[test]
    fn export_url_includes_optional_gid() {
        assert_eq!(
            spreadsheet_export_url("abc", Some("7")),
            "https://docs.google.com/spreadsheets/d/abc/export?format=tsv&gid=7"
        );
    }
}
