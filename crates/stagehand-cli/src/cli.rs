use std::path::PathBuf;

use clap::{value_parser, ArgAction, Parser, Subcommand};
use stagehand_core::StagehandCommand;

#[derive(Parser, Debug)]
#[command(
    name = "stagehand",
    version,
    about = "Download, unpack and launch a hosted application bundle.",
    after_help = "Examples:\n  stagehand run\n  stagehand --config atlas.toml stage\n  stagehand -D app.version=2.1 show-launch\n"
)]
pub struct StagehandCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(
        long,
        value_parser = value_parser!(PathBuf),
        help = "Config file path (defaults to $STAGEHAND_CONFIG, then the user config dir)",
        global = true
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short = 'D',
        long = "define",
        value_name = "KEY=VALUE",
        action = ArgAction::Append,
        help = "Set a config property; overrides the config file",
        global = true
    )]
    pub defines: Vec<String>,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCli {
    #[command(
        about = "Stage the application (refreshing it when the version changed), then launch it.",
        override_usage = "stagehand run [-D KEY=VALUE]...",
        after_help = "Examples:\n  stagehand run\n  STAGEHAND_TMPDIR=/var/tmp stagehand run\n"
    )]
    Run,
    #[command(
        about = "Run the version gate, fetch missing archives and unpack them without launching.",
        after_help = "Examples:\n  stagehand stage\n  stagehand --json stage\n"
    )]
    Stage,
    #[command(
        about = "Print the resolved launch plan without touching the network.",
        after_help = "Examples:\n  stagehand show-launch\n  stagehand --json show-launch\n"
    )]
    ShowLaunch,
}

impl CommandCli {
    pub fn to_command(self) -> StagehandCommand {
        match self {
            Self::Run => StagehandCommand::Run,
            Self::Stage => StagehandCommand::Stage,
            Self::ShowLaunch => StagehandCommand::ShowLaunch,
        }
    }
}
