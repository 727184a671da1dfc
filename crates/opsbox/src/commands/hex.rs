use anyhow::{Context as _, Result};
use clap::Args;
use opsbox_frames::{parse_hex_frame, render_report};

use crate::Context;

#[derive(Args, Debug)]
pub struct HexArgs {
    /// Frame as hex digits; whitespace is ignored. Prompted for when absent.
    hex: Vec<String>,
}

pub fn handle_hex_command(args: HexArgs, ctx: &mut Context) -> Result<()> {
    let input = if args.hex.is_empty() {
        ctx.prompter.ask("Enter hex string: ")?
    } else {
        args.hex.join("")
    };
    let frame = parse_hex_frame(&input).context("could not parse hex frame")?;
    for line in render_report(&frame).lines() {
        ctx.prompter.say(line);
    }
    Ok(())
}
