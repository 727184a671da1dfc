use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Args;
use opsbox_core::notify::{post_rota, rota_message, today_in, watch, Delivery, SlackNotifier, WeeklySchedule};
use tracing::info;

use super::rota::RotaSourceArgs;
use crate::Context;

#[derive(Args, Debug)]
pub struct NotifyArgs {
    #[command(flatten)]
    source: RotaSourceArgs,

    /// Pin the posted message (bot token delivery only)
    #[arg(long)]
    pin: bool,

    /// Keep running and post on every weekly trigger
    #[arg(long)]
    watch: bool,
}

pub async fn handle_notify_command(args: NotifyArgs, ctx: &mut Context) -> Result<()> {
    let mut notify = ctx.config.notify.clone();
    notify.pin |= args.pin;
    let source = args.source.resolve(&notify);
    let schedule = WeeklySchedule::from_config(&notify.schedule)?;

    if ctx.dry_run {
        let rota = source.load().await?;
        let today = today_in(schedule.timezone, Utc::now());
        let message = rota_message(&rota.weeks(today));
        info!("Dry run: not posting to Slack");
        ctx.prompter.say(&message.text);
        for line in message.blocks.iter().filter_map(|b| b["text"]["text"].as_str()) {
            ctx.prompter.say(line);
        }
        if let Some(next) = schedule.next_after(Utc::now()) {
            ctx.prompter.say(&format!("Next scheduled post: {}", next.with_timezone(&schedule.timezone)));
        }
        return Ok(());
    }

    let delivery = Delivery::from_config(&notify)?;
    let notifier = SlackNotifier::new(delivery)?;

    if args.watch {
        let posts = watch(&notifier, &source, &schedule).await?;
        ctx.prompter.say(&format!("Rota watcher stopped after {posts} post(s)"));
        return Ok(());
    }

    match post_rota(&notifier, &source, schedule.timezone)
        .await
        .context("failed to post rota to Slack")?
    {
        Some(posted) => ctx.prompter.say(&format!("Posted to {} (ts {})", posted.channel, posted.ts)),
        None => ctx.prompter.say("Posted via webhook"),
    }
    Ok(())
}
