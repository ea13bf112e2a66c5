// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sdrmgrd - VITA-49 resource manager daemon
//!
//! # Usage
//!
//! ```bash
//! # Foreground, log to stderr
//! sdrmgrd -f -c /etc/sdrmgr/sdrmgr.toml
//!
//! # Background, log to a file, trace the unix control only
//! sdrmgrd -l /var/log/sdrmgr.log -d info -d 'control::unix=trace'
//!
//! # Write an example configuration
//! sdrmgrd gen-config -o sdrmgr.toml
//!
//! # Check a configuration without starting
//! sdrmgrd validate -c sdrmgr.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sdrmgr::daemon::watchdog;
use sdrmgr::logging::{self, LogOptions};
use sdrmgr::{Daemon, DaemonConfig, ResourceList};
use std::path::PathBuf;
use std::sync::atomic::Ordering;

#[derive(Parser, Debug)]
#[command(name = "sdrmgrd")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "VITA-49 resource manager - routes SDR control traffic to stream workers")]
struct Args {
    /// Stay in the foreground
    #[arg(short, long)]
    foreground: bool,

    /// Log file (appended), or - for stderr
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/sdrmgr/sdrmgr.toml")]
    config: PathBuf,

    /// Verbosity: LEVEL or GLOB=LEVEL against module names (repeatable)
    #[arg(short, long, value_name = "[GLOB=]LEVEL")]
    debug: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "sdrmgr.toml")]
        output: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = DaemonConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    logging::init(&LogOptions {
        destination: args.log.clone(),
        debug: args.debug.clone(),
    })
    .context("Failed to initialise logging")?;

    if !args.foreground {
        daemonize().context("Failed to detach from terminal")?;
    }

    let mut daemon = Daemon::new(config).context("Failed to build daemon")?;
    watchdog::install_panic_hook(daemon.breadcrumb());

    let stop = daemon.stop_handle();
    ctrlc::set_handler(move || {
        tracing::info!("Received termination signal, shutting down...");
        stop.store(true, Ordering::SeqCst);
    })
    .context("Failed to install signal handler")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "sdrmgrd starting"
    );
    daemon.run().context("Event loop failed")?;
    Ok(())
}

fn daemonize() -> std::io::Result<()> {
    // SAFETY: called before any thread is spawned; daemon(3) only forks,
    // calls setsid and redirects the standard descriptors.
    let rc = unsafe { libc::daemon(0, 0) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn cmd_gen_config(output: PathBuf) -> Result<()> {
    let text = toml::to_string_pretty(&DaemonConfig::example()).context("Failed to serialize")?;
    std::fs::write(&output, text)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Example configuration written to: {}", output.display());
    Ok(())
}

fn cmd_validate(path: PathBuf) -> Result<()> {
    match DaemonConfig::from_file(&path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            for (i, control) in config.control.iter().enumerate() {
                println!("  control [{}] {} ({})", i, config.control_name(i), control.class);
            }
            for (i, worker) in config.worker.iter().enumerate() {
                println!("  worker  [{}] {} ({})", i, config.worker_name(i), worker.class);
            }
            if let Some(resources) = &config.manager.resources {
                let list = ResourceList::load(resources)
                    .with_context(|| format!("Failed to load {}", resources.display()))?;
                println!("  resources: {} from {}", list.len(), resources.display());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let args = Args::try_parse_from([
            "sdrmgrd", "-f", "-c", "/tmp/s.toml", "-d", "debug", "-d", "control*=trace",
        ])
        .expect("parse");
        assert!(args.foreground);
        assert_eq!(args.config, PathBuf::from("/tmp/s.toml"));
        assert_eq!(args.debug, vec!["debug", "control*=trace"]);
        assert!(args.command.is_none());

        let args = Args::try_parse_from(["sdrmgrd", "validate", "-c", "x.toml"]).expect("parse");
        assert!(matches!(args.command, Some(Commands::Validate { .. })));
    }

    #[test]
    fn test_gen_config_writes_valid_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sdrmgr.toml");
        cmd_gen_config(path.clone()).expect("gen-config");
        let config = DaemonConfig::from_file(&path).expect("valid");
        assert_eq!(config.control.len(), 2);
    }
}
