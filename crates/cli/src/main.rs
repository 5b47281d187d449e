use clap::{Parser, Subcommand};
use evcam_remote::api::{ApiClient, DingTalkClient};
use evcam_remote::dispatch::CommandListener;
use evcam_remote::recorder::{LoggingListener, ProgramRecorder};
use evcam_remote::{RemoteControl, RemoteOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Parser)]
#[command(name = "evcam")]
#[command(about = "EVCam remote control via DingTalk", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: EVCAM_CONFIG_PATH or ~/.evcam/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Connect to the DingTalk stream and execute record commands until Ctrl-C.
    Listen {
        /// Config file path (default: EVCAM_CONFIG_PATH or ~/.evcam/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Parse a chat message offline and print the resulting command as JSON.
    Parse {
        /// Message text, e.g. "@bot 录制30"
        #[arg(required = true)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("evcam {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Listen { config }) => {
            if let Err(e) = run_listen(config).await {
                log::error!("listen failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Parse { text }) => {
            if let Err(e) = run_parse(&text.join(" ")) {
                log::error!("parse failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(evcam_remote::config::default_config_path);
    let dir = evcam_remote::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_listen(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, path) = evcam_remote::config::load_config(config_path)?;
    evcam_remote::init::require_credentials(&path, &config)?;
    let api: Arc<dyn ApiClient> = Arc::new(DingTalkClient::from_config(&config)?);
    let listener: Arc<dyn CommandListener> = match ProgramRecorder::from_config(&config.recorder) {
        Some(recorder) => Arc::new(recorder.with_delivery(Arc::clone(&api), Handle::current())),
        None => {
            log::warn!("no recorder.program configured; record commands will only be logged");
            Arc::new(LoggingListener)
        }
    };

    let remote = RemoteControl::new(api, listener, RemoteOptions::from(&config));
    remote.start();
    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    remote.shutdown().await;
    Ok(())
}

fn run_parse(text: &str) -> anyhow::Result<()> {
    let command = evcam_remote::command::parse(text);
    println!("{}", serde_json::to_string(&command)?);
    Ok(())
}
