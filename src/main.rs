use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use beanbotics::config::{DEFAULT_CONFIG_PATH, DeskConfig};
use beanbotics::logging::{self, LogGuard, LogOptions};

mod cmd;

#[derive(Parser)]
#[command(name = "beanbotics")]
#[command(version, about = "BeanBotics support desk with a real-time ticket pipeline")]
pub struct Cli {
    /// Path to the desk configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ticket desk server (JSON API, forms, WebSocket and agent)
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Enable dev mode (permissive CORS, bind on all interfaces)
        #[arg(long)]
        dev: bool,

        /// Do not start the support agent
        #[arg(long)]
        no_agent: bool,
    },
    /// Pick the troubleshooting guide for an issue description
    Guide {
        /// Free-text issue description
        #[arg(required = true, num_args = 1..)]
        issue: Vec<String>,

        /// Print the selection as JSON
        #[arg(long)]
        json: bool,
    },
    /// View, validate or create the configuration file
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(cli: &Cli, config: &DeskConfig) -> Result<LogGuard> {
    logging::init(&LogOptions {
        verbose: cli.verbose,
        json: cli.log_json || config.logging.json,
        dir: config.logging.dir.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match &cli.command {
        Commands::Serve {
            port,
            host,
            dev,
            no_agent,
        } => {
            let config = DeskConfig::load(&config_path)?;
            let _guard = init_logging(&cli, &config)?;
            cmd::cmd_serve(
                config,
                cmd::ServeOverrides {
                    port: *port,
                    host: host.clone(),
                    dev: *dev,
                    no_agent: *no_agent,
                },
            )
            .await?;
        }
        Commands::Guide { issue, json } => {
            let config = DeskConfig::load(&config_path)?;
            let _guard = init_logging(&cli, &config)?;
            cmd::cmd_guide(&config, &config_path, &issue.join(" "), *json).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&config_path, command.clone())?,
    }

    Ok(())
}
