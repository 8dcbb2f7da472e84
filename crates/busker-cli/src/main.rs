//! busker - run, inspect, and call tool apps
//!
//! Subcommands:
//! - `busker demo` - Serve the bundled Notes app
//! - `busker describe --url <url>` - Print an app's metadata and tool catalog
//! - `busker call --url <url> <tool> -a name=value` - Invoke a tool
//! - `busker fetch --url <url> <call_id> <index> -o <file>` - Download a result file
//! - `busker init <Name>` - Scaffold a new app crate
//! - `busker config` - Show the effective configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use busker_cli::{commands, demo, telemetry};
use busker_conf::BuskerConfig;

#[derive(Parser)]
#[command(name = "busker")]
#[command(about = "Tool app runtime and client")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./busker.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the bundled Notes demo app
    Demo {
        /// Address to bind (unix:///path, tcp://host:port, or host:port)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Print an app's metadata and tool catalog
    Describe {
        /// Service root URL (e.g., http://127.0.0.1:7070)
        #[arg(short, long)]
        url: String,
    },

    /// Print the reflection document
    Discover {
        #[arg(short, long)]
        url: String,
    },

    /// Check that an app is alive
    Ping {
        #[arg(short, long)]
        url: String,
    },

    /// Invoke a tool
    Call {
        #[arg(short, long)]
        url: String,

        /// Tool name
        tool: String,

        /// Arguments as name=value; values may be tagged JSON ({"int": 3})
        #[arg(short = 'a', long = "arg")]
        args: Vec<String>,

        /// Download result files into this directory
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },

    /// Download a file referenced by an earlier call's result
    Fetch {
        #[arg(short, long)]
        url: String,

        call_id: String,

        index: usize,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Scaffold a new app crate
    Init {
        /// App name in PascalCase (e.g. WebsiteFetcher)
        name: String,

        #[arg(short, long)]
        description: String,

        /// Example prompt (repeatable)
        #[arg(short, long = "prompt")]
        prompts: Vec<String>,

        /// Parent directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, sources) = BuskerConfig::load_with_sources_from(cli.config.as_deref())?;

    if matches!(cli.command, Commands::Demo { .. }) {
        telemetry::init(&config.telemetry, "busker-demo")?;
    } else {
        telemetry::init_console(&config.telemetry);
    }

    match cli.command {
        Commands::Demo { bind } => {
            if let Some(bind) = bind {
                config.bind.address = bind;
            }
            tracing::info!(shared_dir = %config.paths.shared_dir.display(), "Starting Notes demo");
            busker::launch_with(demo::NotesApp::new(), config).await?;
        }
        Commands::Describe { url } => commands::describe(&url).await?,
        Commands::Discover { url } => commands::discover(&url).await?,
        Commands::Ping { url } => commands::ping(&url).await?,
        Commands::Call {
            url,
            tool,
            args,
            save_dir,
        } => commands::call(&url, &tool, &args, save_dir.as_deref()).await?,
        Commands::Fetch {
            url,
            call_id,
            index,
            out,
        } => commands::fetch(&url, &call_id, index, &out).await?,
        Commands::Init {
            name,
            description,
            prompts,
            dir,
        } => {
            commands::init(&dir, &name, &description, prompts)?;
        }
        Commands::Config => commands::show_config(&config, &sources),
    }

    Ok(())
}
