mod commands;
mod terminal_output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use parley_config::{check_config, config_dir, config_file_path, load_config};
use parley_logging::{init_logger, spawn_event_logger};
use parley_plugins::{builtin_catalog, PluginManager};

use terminal_output::{note_error, note_warn};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley: plugin runtime for chat workspaces")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.parley/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List plugins and their states after loading
    Plugins,
    /// Run one chat turn through the plugins and the echo gateway
    Chat {
        /// Message text
        text: String,
    },
    /// Invoke a plugin tool and print the result as JSON
    Tool {
        plugin: String,
        tool: String,
        /// Tool parameter as key=value; repeatable
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        note_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let path = cli
        .config
        .unwrap_or_else(|| config_file_path(&config_dir()));
    let config = load_config(&path).await?;
    let _log_guard = init_logger(&config.logging)?;
    check_config(&config)?;
    debug!(path = %path.display(), "Config ready");

    let manager = Arc::new(PluginManager::new(config.plugins.clone()).with_catalog(builtin_catalog()));
    let event_logger = spawn_event_logger(manager.subscribe());

    let report = manager.load_plugins().await;
    for failure in &report.failed {
        note_warn(&format!("plugin {} failed to load: {}", failure.plugin_id, failure.reason));
    }

    let result = match cli.command {
        Commands::Plugins => commands::list_plugins(&manager).await,
        Commands::Chat { text } => commands::chat(manager.clone(), &config, text).await,
        Commands::Tool { plugin, tool, params } => {
            commands::run_tool(&manager, &plugin, &tool, &params).await
        }
    };

    manager.shutdown().await;
    event_logger.abort();
    info!("Parley exiting");
    result
}
