use anyhow::Result;
use chrono::Utc;
use opsbox_core::cleanup::Cleanup;

use crate::Context;

pub async fn handle_cleanup_command(ctx: &mut Context) -> Result<()> {
    let cleanup = Cleanup::new(ctx.runner.as_ref(), &ctx.config.cleanup);
    let report = cleanup.run(ctx.prompter.as_mut(), Utc::now()).await?;

    ctx.prompter.say("");
    ctx.prompter.say("--- Cleanup Summary ---");
    ctx.prompter.say(&report.summary());
    for failure in &report.failures {
        ctx.prompter.say(&format!("  skipped: {failure}"));
    }
    Ok(())
}
