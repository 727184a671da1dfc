use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use opsbox_core::config::NotifyConfig;
use opsbox_core::notify::{parse_timezone, today_in};
use opsbox_core::rota::RotaSource;
use tracing::debug;

use crate::Context;

const DEFAULT_ROTA_FILE: &str = "janitor-rota.txt";

/// Where to read the rota from. Flags win over configuration; without
/// either, `janitor-rota.txt` in the current directory is used.
#[derive(Args, Debug, Default)]
pub struct RotaSourceArgs {
    /// Tab-separated rota file
    #[arg(long, conflicts_with = "spreadsheet")]
    file: Option<PathBuf>,

    /// Spreadsheet ID whose TSV export holds the rota
    #[arg(long)]
    spreadsheet: Option<String>,

    /// Sheet gid within the spreadsheet
    #[arg(long, requires = "spreadsheet")]
    gid: Option<String>,
}

impl RotaSourceArgs {
    pub fn resolve(&self, config: &NotifyConfig) -> RotaSource {
        if let Some(path) = &self.file {
            return RotaSource::File(path.clone());
        }
        if let Some(id) = &self.spreadsheet {
            return RotaSource::Spreadsheet {
                id: id.clone(),
                gid: self.gid.clone(),
            };
        }
        if let Some(path) = &config.rota_file {
            return RotaSource::File(path.clone());
        }
        if let Some(id) = &config.spreadsheet_id {
            return RotaSource::Spreadsheet {
                id: id.clone(),
                gid: config.sheet_gid.clone(),
            };
        }
        RotaSource::File(PathBuf::from(DEFAULT_ROTA_FILE))
    }
}

pub async fn handle_rota_command(args: RotaSourceArgs, ctx: &mut Context) -> Result<()> {
    let source = args.resolve(&ctx.config.notify);
    debug!(?source, "Reading rota");
    let timezone = parse_timezone(&ctx.config.notify.schedule.timezone)?;
    let rota = source.load().await?;
    for line in rota.weeks(today_in(timezone, Utc::now())).report_lines() {
        ctx.prompter.say(&line);
    }
    Ok(())
}
