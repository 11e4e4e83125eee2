mod bundle;
mod release;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Playrate build automation tasks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the wasm library and assemble the unpacked extension in dist/
    Bundle {
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },

    /// Check that dist/ holds everything the browser loads
    Verify,

    /// Bump the version, bundle and push the release tag
    Release {
        /// Release level: patch, minor, or major
        #[arg(default_value = "patch")]
        level: String,

        /// Dry run - don't actually commit or push
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bundle { release } => bundle::run_bundle(release),
        Commands::Verify => cmd_verify(),
        Commands::Release { level, dry_run } => release::run_release(&level, dry_run),
    }
}

/// Command: cargo xtask verify
fn cmd_verify() -> Result<()> {
    println!("Verifying {}/...", bundle::DIST_DIR);
    bundle::verify_dist()?;
    println!("All extension files present");
    Ok(())
}
