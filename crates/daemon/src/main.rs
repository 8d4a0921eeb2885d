// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use clap::Parser;
use tracing::{error, info, warn};

use iqrfgd::config::{Cli, LogFormat};

/// Write our PID, warning when the file already names a live process.
fn pid_init(path: &Path) {
    if let Ok(content) = std::fs::read_to_string(path) {
        if let Ok(pid) = content.trim().parse::<u32>() {
            if Path::new(&format!("/proc/{pid}")).exists() {
                warn!(pid, "pid file names a running process");
            }
        } else {
            warn!(path = %path.display(), "pid file contains invalid content");
        }
    } else {
        info!(path = %path.display(), "creating pid file");
    }
    if let Err(e) = std::fs::write(path, format!("{}\n", std::process::id())) {
        warn!(path = %path.display(), err = %e, "failed to write pid file");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    pid_init(&cli.pidfile);

    if let Err(e) = iqrfgd::run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
