mod config;
mod display;
mod http;
mod metrics;
mod orchestrator;
mod refresh;
mod script;
mod state;

use axum::serve;
use clap::Parser;
use config::Config;
use metrics::{now_unix, Metrics};
use orchestrator::Orchestrator;
use script::ShellScriptRunner;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hidpid")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `script.path` from the config file.
    #[arg(long)]
    script: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.script {
        cfg.script.path = path;
        if let Err(err) = cfg.validate() {
            error!(error = %err, "invalid --script override");
            std::process::exit(1);
        }
    }

    info!(
        listen = %cfg.listen,
        script = %cfg.script.path.display(),
        refresh_interval_secs = cfg.refresh_interval_secs,
        "starting hidpid"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };
    let runner = Arc::new(ShellScriptRunner::from_config(&cfg.script));
    let orchestrator = Orchestrator::new(runner, metrics.clone(), now_unix());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let orchestrator = orchestrator.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, orchestrator);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to bind HTTP listener");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    if cfg.load_info_on_start {
        // Detached: the result lands in the state like any other operation.
        drop(orchestrator.load_system_info().await);
    }

    let refresh_task = (cfg.refresh_interval_secs > 0).then(|| {
        tokio::spawn(refresh::run_refresh_loop(
            orchestrator.clone(),
            Duration::from_secs(cfg.refresh_interval_secs),
            shutdown_rx.clone(),
        ))
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    if let Some(task) = refresh_task {
        let _ = task.await;
    }
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
