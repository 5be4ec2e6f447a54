use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use clawmic_reader::config::{self, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

const HELP: &str = "Clawmic Reader - read the bilingual Clawmic comic from the terminal.

Usage: clawmic-reader [OPTIONS] [FRAGMENT]

  FRAGMENT             Start at a location such as #/reader/2/3 or #/about
  --config <PATH>      Read configuration from PATH
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

struct Cli {
    config_file: Option<PathBuf>,
    fragment: Option<String>,
}

fn main() {
    let Some(cli) = handle_cli_flags() else {
        return;
    };

    let cfg = match config::load(config::LoadOptions {
        config_file: cli.config_file,
        env_prefix: None,
    }) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(1);
        }
    };
    init_tracing(&cfg);

    if let Err(err) = clawmic_reader::run(cfg, cli.fragment) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Returns `None` when a flag was handled and the process should exit.
fn handle_cli_flags() -> Option<Cli> {
    let mut cli = Cli {
        config_file: None,
        fragment: None,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Clawmic Reader {}", clawmic_reader::VERSION);
                return None;
            }
            "--help" | "-h" => {
                println!("{HELP}");
                if let Some(path) = config::default_path() {
                    println!("\nConfig file: {}", path.display());
                }
                return None;
            }
            "--config" => match args.next() {
                Some(path) => cli.config_file = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: --config needs a path");
                    std::process::exit(2);
                }
            },
            flag if flag.starts_with("--") => {
                eprintln!("error: unknown option {flag}\n\n{HELP}");
                std::process::exit(2);
            }
            fragment => cli.fragment = Some(fragment.to_string()),
        }
    }
    Some(cli)
}

// The terminal belongs to the UI, so logs only ever go to a file.
fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.logging.level.as_filter_str()));

    let file = cfg
        .logging
        .file
        .clone()
        .or_else(config::default_log_path)
        .context("resolve log path")
        .and_then(|path| {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file {}", path.display()))
        });

    match file {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .try_init();
            info!(version = clawmic_reader::VERSION, "logging initialized");
        }
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
        }
    }
}
