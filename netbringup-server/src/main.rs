use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;
use netbringup::{Orchestrator, Settings, StatusBoard};
use netbringup_server::{AppState, router};

#[derive(Parser)]
#[command(name = "netbringup", version, about = "Network lab bring-up orchestrator")]
struct Cli {
    /// YAML settings file; defaults apply when omitted
    #[arg(long, global = true, env = "NETBRINGUP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP control API
    Serve {
        #[arg(long, default_value = "0.0.0.0:5000")]
        bind: SocketAddr,

        /// Where uploaded testbeds are stored
        #[arg(long, default_value = "uploads")]
        upload_dir: PathBuf,
    },
    /// Run one orchestration in the foreground
    Run {
        /// Testbed file
        testbed: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve { bind, upload_dir } => {
            let state = Arc::new(AppState::new(settings, upload_dir));
            let app = router(state);
            let listener = tokio::net::TcpListener::bind(bind).await?;
            info!("listening on http://{bind}");
            info!("endpoints: /api/upload, /api/orchestrate, /api/status, /api/health");
            axum::serve(listener, app).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { testbed } => {
            let orchestrator = Orchestrator::new(settings, StatusBoard::new());
            let Some(summary) = orchestrator.run(&testbed).await else {
                anyhow::bail!("an orchestration is already running");
            };

            println!("{}", "=".repeat(40));
            for (phase, ok) in &summary.results {
                println!("{phase:20}: {}", if *ok { "PASS" } else { "FAIL" });
            }
            println!("{}", "=".repeat(40));
            if let Some(error) = orchestrator.status().snapshot().error {
                println!("{error}");
            }

            Ok(if summary.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => {
            info!("loading settings from {}", path.display());
            Ok(Settings::load(path).await?)
        }
        None => Ok(Settings::default()),
    }
}
