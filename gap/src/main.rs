use std::process::ExitCode;
use std::sync::Arc;

use slog::{error, info};

mod opts;

fn main() -> ExitCode {
    let args = opts::parse();

    if args.version {
        println!("gap {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let Some(config_file) = args.config_file.clone() else {
        eprintln!("no config file given (use --config)");
        return ExitCode::from(2);
    };

    let logger = gap::log::process_logger();

    let mut listeners = match gap::config::load(&config_file) {
        Ok(listeners) => listeners,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", config_file.display());
            return ExitCode::from(2);
        }
    };

    if let Some(host) = &args.host {
        if let Some(first) = listeners.first_mut() {
            first.bind_host = host.clone();
        }
    }
    if let Some(port) = args.port {
        if let Some(first) = listeners.first_mut() {
            first.bind_port = port;
        }
    }

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    rt.block_on(run(listeners, logger))
}

async fn run(listeners: Vec<gap::ListenerConfig>, logger: slog::Logger) -> ExitCode {
    if listeners.is_empty() {
        eprintln!("no listeners configured");
        return ExitCode::from(2);
    }

    let policy = Arc::new(gap::policy::allow_all());

    let mut tasks = tokio::task::JoinSet::new();
    for cfg in listeners {
        let cfg = Arc::new(cfg);
        let policy = Arc::clone(&policy);
        let logger = logger.clone();
        tasks.spawn(async move {
            if let Err(e) = gap::serve::serve_listener(cfg, policy, logger.clone()).await {
                error!(logger, "listener failed"; "error" => e.to_string());
            }
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(logger, "received shutdown signal");
        }
        _ = tasks.join_next() => {
            error!(logger, "a listener exited unexpectedly");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
