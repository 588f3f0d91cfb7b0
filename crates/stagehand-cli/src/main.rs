use std::io::{self, IsTerminal};
use std::thread;

use anyhow::Context;
use clap::Parser;
use color_eyre::Result;
use serde_json::Value;
use stagehand_core::{
    self, format_status_message, to_json_response, CancelToken, CommandStatus, ExecutionOutcome,
    GlobalOptions, StagehandCommand,
};
use tracing::{debug, warn};

mod cli;
mod style;

use cli::StagehandCli;
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = StagehandCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        defines: cli.defines.clone(),
    };

    let command = cli.command.to_command();
    let cancel = CancelToken::new();
    if let Err(err) = watch_for_interrupt(&cancel) {
        debug!(error = %format!("{err:#}"), "ctrl-c handler unavailable");
    }

    let outcome = stagehand_core::execute(&global, command, &cancel);
    let code = emit_output(&cli, command, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("stagehand={level},stagehand_core={level},stagehand_store={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Exit status for a second Ctrl-C, matching a shell's report of death by SIGINT.
const INTERRUPTED_EXIT: i32 = 130;

/// Flips `cancel` on the first Ctrl-C so an in-flight download stops at the next chunk and
/// nothing is launched; a second Ctrl-C exits immediately.
fn watch_for_interrupt(cancel: &CancelToken) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    let cancel = cancel.clone();
    thread::Builder::new()
        .name("stagehand-signal".into())
        .spawn(move || {
            if runtime.block_on(tokio::signal::ctrl_c()).is_err() {
                return;
            }
            warn!("interrupt received; cancelling (press Ctrl-C again to exit now)");
            cancel.cancel();
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                warn!("second interrupt; exiting");
                std::process::exit(INTERRUPTED_EXIT);
            }
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

fn emit_output(
    cli: &StagehandCli,
    command: StagehandCommand,
    outcome: &ExecutionOutcome,
) -> Result<i32> {
    let code = outcome.exit_code();
    let style = Style::new(cli.no_color, io::stdout().is_terminal());

    if cli.json {
        let payload = to_json_response(command.name(), outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !cli.quiet {
        let message = format_status_message(command.name(), &outcome.message);
        println!("{}", style.status(outcome.status, &message));
        if let Some(summary) = staging_summary(&outcome.details) {
            println!("{}", style.info(&summary));
        }
        if let Some(hint) = hint_from_details(&outcome.details) {
            println!("{}", style.hint(hint));
        }
    } else if outcome.status != CommandStatus::Ok {
        eprintln!("{}", format_status_message(command.name(), &outcome.message));
    }

    Ok(code)
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

/// `fetched: a, b; reused: c` for stage and run outcomes.
fn staging_summary(details: &Value) -> Option<String> {
    let staging = details.get("staging").unwrap_or(details);
    let names = |key: &str| -> Option<String> {
        let list = staging.get(key)?.as_array()?;
        if list.is_empty() {
            return None;
        }
        let joined = list
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("{key}: {joined}"))
    };
    let parts: Vec<String> = ["fetched", "reused"]
        .into_iter()
        .filter_map(names)
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn staging_summary_lists_fetched_and_reused() {
        let details = json!({ "fetched": ["core"], "reused": ["plugins", "jre"] });
        assert_eq!(
            staging_summary(&details).as_deref(),
            Some("fetched: core; reused: plugins, jre")
        );
    }

    #[test]
    fn staging_summary_reads_nested_run_report() {
        let details = json!({ "staging": { "fetched": [], "reused": ["core"] } });
        assert_eq!(staging_summary(&details).as_deref(), Some("reused: core"));
        assert_eq!(staging_summary(&json!({ "launch": {} })), None);
    }
}
