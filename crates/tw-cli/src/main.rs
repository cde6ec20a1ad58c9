mod commands;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Instrument;
use tw_core::config::Config;
use tw_telemetry::logging::{self, LogFormat};
use tw_telemetry::spans::command_span;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// taskwatch -- follow agent tasks running on a local daemon.
#[derive(Parser)]
#[command(name = "tw", version, about)]
struct Cli {
    /// Daemon base URL (overrides config and TASKWATCH_URL).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Config file (default: ~/.taskwatch/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List known tasks, newest first (default when no subcommand is given).
    Tasks {
        /// Seconds to wait for the daemon's task list.
        #[arg(long, default_value_t = 3)]
        wait: u64,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Follow a task's live events, todos and input queue.
    Watch {
        /// Task id.
        task: String,
        /// Exit once the task is idle.
        #[arg(long)]
        until_idle: bool,
    },

    /// Send a message to a task.
    Send {
        /// Task id.
        task: String,
        /// Message text.
        message: String,
        #[arg(long)]
        web_search: bool,
    },

    /// Create a task from a first message.
    New {
        /// Message text; also used as the task name.
        message: String,
        /// Working directory for the task.
        #[arg(long)]
        cwd: Option<String>,
        #[arg(long)]
        web_search: bool,
        /// Keep following the new task.
        #[arg(long)]
        watch: bool,
    },

    /// Stop a task's current generation.
    Cancel {
        /// Task id.
        task: String,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Tasks { .. } => "tasks",
            Commands::Watch { .. } => "watch",
            Commands::Send { .. } => "send",
            Commands::New { .. } => "new",
            Commands::Cancel { .. } => "cancel",
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => Config::load()?,
    };
    if let Some(url) = &cli.url {
        config.daemon.base_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init(
        "tw",
        &config.logging.level,
        LogFormat::from_json_flag(config.logging.json),
    );

    let command = cli.command.unwrap_or(Commands::Tasks {
        wait: 3,
        json: false,
    });
    let (span, run_id) = command_span(command.name());

    async move {
        let ctx = commands::Context::start(&config, run_id);
        let result = match command {
            Commands::Tasks { wait, json } => commands::tasks::run(&ctx, wait, json).await,
            Commands::Watch { task, until_idle } => {
                commands::watch::run(&ctx, &task, until_idle).await
            }
            Commands::Send {
                task,
                message,
                web_search,
            } => commands::send::run(&ctx, &task, &message, web_search).await,
            Commands::New {
                message,
                cwd,
                web_search,
                watch,
            } => commands::new::run(&ctx, message, cwd, web_search, watch).await,
            Commands::Cancel { task } => commands::cancel::run(&ctx, &task).await,
        };
        ctx.shutdown().await;
        result
    }
    .instrument(span)
    .await
}
