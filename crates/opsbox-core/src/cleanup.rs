//! Docker disk cleanup: oversized container logs and stale images.

use std::fs::OpenOptions;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, Utc};
use comfy_table::{presets::UTF8_FULL, Table};
use tracing::{debug, info, warn};

use crate::config::CleanupConfig;
use crate::docker::{DiskUsageRow, Docker, ImageRow};
use crate::error::Result;
use crate::postgres::dumps::human_size;
use crate::process::CommandRunner;
use crate::prompt::{confirm, Prompter};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OversizedLog {
    pub container: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleImage {
    pub reference: String,
    pub id: String,
    pub size: String,
    pub age_days: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub logs_truncated: Vec<PathBuf>,
    pub bytes_reclaimed: u64,
    pub images_removed: Vec<String>,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn summary(&self) -> String {
        format!(
            "{} log(s) truncated ({} reclaimed), {} image(s) removed, {} failure(s)",
            self.logs_truncated.len(),
            human_size(self.bytes_reclaimed),
            self.images_removed.len(),
            self.failures.len()
        )
    }
}

pub fn disk_usage_table(rows: &[DiskUsageRow]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Type", "Total", "Active", "Size", "Reclaimable"]);
    for row in rows {
        table.add_row(vec![
            row.kind.as_str(),
            row.total.as_str(),
            row.active.as_str(),
            row.size.as_str(),
            row.reclaimable.as_str(),
        ]);
    }
    table
}

/// Parses the `CreatedAt` column of `docker images`, e.g.
/// `2024-01-15 10:30:00 +0000 UTC`. The trailing zone name is ignored.
pub fn parse_created_at(raw: &str) -> Option<DateTime<FixedOffset>> {
    let head = raw.get(..25).unwrap_or(raw);
    DateTime::parse_from_str(head.trim(), "%Y-%m-%d %H:%M:%S %z").ok()
}

/// Images created more than `max_age_days` before `now`.
pub fn stale_images(images: &[ImageRow], max_age_days: i64, now: DateTime<Utc>) -> Vec<StaleImage> {
    images
        .iter()
        .filter_map(|image| {
            let Some(created) = parse_created_at(&image.created_at) else {
                debug!(image = %image.reference(), created_at = %image.created_at, "Unparseable image date");
                return None;
            };
            let age_days = (now - created.with_timezone(&Utc)).num_days();
            (age_days > max_age_days).then(|| StaleImage {
                reference: image.reference(),
                id: image.id.clone(),
                size: image.size.clone(),
                age_days,
            })
        })
        .collect()
}

pub struct Cleanup<'a> {
    docker: Docker<'a>,
    config: &'a CleanupConfig,
}

impl<'a> Cleanup<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a CleanupConfig) -> Self {
        Self {
            docker: Docker::new(runner),
            config,
        }
    }

    pub async fn disk_usage(&self) -> Result<Table> {
        Ok(disk_usage_table(&self.docker.disk_usage().await?))
    }

    /// Container log files above the configured size threshold.
    pub async fn oversized_logs(&self) -> Result<Vec<OversizedLog>> {
        let threshold = self.config.log_size_threshold_mb * MIB;
        let mut found = Vec::new();
        for container in self.docker.container_names(true).await? {
            let Some(path) = self.docker.log_path(&container).await? else {
                continue;
            };
            let path = PathBuf::from(path);
            match path.metadata() {
                Ok(meta) if meta.len() > threshold => found.push(OversizedLog {
                    container,
                    path,
                    size: meta.len(),
                }),
                Ok(_) => {}
                Err(err) => {
                    debug!(container = %container, path = %path.display(), error = %err, "Cannot stat log file")
                }
            }
        }
        found.sort_by(|a, b| b.size.cmp(&a.size));
        Ok(found)
    }

    /// Empties each log file in place. Failures are recorded, not fatal.
    pub fn truncate_logs(&self, logs: &[OversizedLog], report: &mut CleanupReport) {
        for log in logs {
            let result = OpenOptions::new()
                .write(true)
                .open(&log.path)
                .and_then(|file| file.set_len(0));
            match result {
                Ok(()) => {
                    info!(container = %log.container, size = %human_size(log.size), "Truncated log");
                    report.logs_truncated.push(log.path.clone());
                    report.bytes_reclaimed += log.size;
                }
                Err(err) => {
                    warn!(path = %log.path.display(), error = %err, "Failed to truncate log");
                    report.failures.push(format!("{}: {err}", log.path.display()));
                }
            }
        }
    }

    pub async fn stale_images(&self, now: DateTime<Utc>) -> Result<Vec<StaleImage>> {
        let images = self.docker.images().await?;
        Ok(stale_images(&images, self.config.image_max_age_days, now))
    }

    /// Removes images with `docker rmi`; images still in use stay and are
    /// recorded as failures.
    pub async fn remove_images(&self, images: &[StaleImage], report: &mut CleanupReport) -> Result<()> {
        for image in images {
            let output = self.docker.remove_image(&image.id).await?;
            if output.success() {
                info!(image = %image.reference, "Removed image");
                report.images_removed.push(image.reference.clone());
            } else {
                warn!(image = %image.reference, stderr = %output.stderr.trim(), "Could not remove image");
                report.failures.push(format!("{}: {}", image.reference, output.stderr.trim()));
            }
        }
        Ok(())
    }

    /// Prints the disk usage report, then offers each destructive step
    /// behind its own y/N prompt.
    pub async fn run(&self, prompter: &mut dyn Prompter, now: DateTime<Utc>) -> Result<CleanupReport> {
        self.docker.ensure_available().await?;
        let mut report = CleanupReport::default();

        prompter.say("Docker disk usage:");
        prompter.say(&self.disk_usage().await?.to_string());

        let logs = self.oversized_logs().await?;
        if logs.is_empty() {
            info!(threshold_mb = self.config.log_size_threshold_mb, "No oversized container logs");
        } else {
            prompter.say(&format!(
                "Container logs larger than {} MB:",
                self.config.log_size_threshold_mb
            ));
            for log in &logs {
                prompter.say(&format!("  {} {} ({})", log.container, log.path.display(), human_size(log.size)));
            }
            if confirm(prompter, "Truncate these log files?", false)? {
                self.truncate_logs(&logs, &mut report);
            }
        }

        let images = self.stale_images(now).await?;
        if images.is_empty() {
            info!(max_age_days = self.config.image_max_age_days, "No stale images");
        } else {
            prompter.say(&format!(
                "Images older than {} days:",
                self.config.image_max_age_days
            ));
            for image in &images {
                prompter.say(&format!("  {} ({}, {} days old)", image.reference, image.size, image.age_days));
            }
            if confirm(prompter, "Remove these images?", false)? {
                self.remove_images(&images, &mut report).await?;
            }
        }

        info!("{}", report.summary());
        Ok(report)
    }
}
