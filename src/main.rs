//! # kompost CLI
//!
//! `kompost build <dir>` composes the kustomization at `dir` and writes
//! the resulting YAML stream to stdout. Exit code 0 on success, 1 on any
//! error with a single-line message on stderr.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use kompost::loader::Loader;
use kompost::target::KustTarget;
use std::path::PathBuf;

/// Manages declarative configuration of Kubernetes.
#[derive(Parser)]
#[command(name = "kompost")]
#[command(about = "Manages declarative configuration of Kubernetes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum Reorder {
    /// Emit resources in the order they were declared.
    #[default]
    None,
    /// Sort cluster-scope foundations first, webhooks last.
    Legacy,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the kustomization in the given directory and print the result
    Build {
        /// Directory containing a kustomization file
        path: PathBuf,

        /// Output ordering
        #[arg(long, value_enum, default_value = "none")]
        reorder: Reorder,
    },
    /// Print version information
    Version,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kompost=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Build { path, reorder } => {
            let ldr = Loader::new_at_root(&path)?;
            let target = KustTarget::new(ldr)?;
            let map = match reorder {
                Reorder::None => target.make_customized_res_map()?,
                Reorder::Legacy => target.make_ordered_res_map()?,
            };
            print!("{}", map.as_yaml()?);
            Ok(())
        }
        Commands::Version => {
            println!("kompost {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
