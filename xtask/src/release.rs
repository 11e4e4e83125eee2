use anyhow::{Context, Result};
use std::process::Command;

pub const LEVELS: &[&str] = &["patch", "minor", "major"];

/// Bump the version with `cargo release`, bundle the extension and push the tag.
///
/// The bundle runs between the version bump and the push so a tag is never
/// published for a tree that fails to build for wasm32.
pub fn run_release(level: &str, dry_run: bool) -> Result<()> {
    if !LEVELS.contains(&level) {
        anyhow::bail!("Invalid release level: '{}'. Must be one of: {}", level, LEVELS.join(", "));
    }

    println!("========================================");
    println!("Preparing {} release{}", level, if dry_run { " (dry run)" } else { "" });
    println!("========================================");
    println!();

    println!("[1/3] Updating version...");
    let mut cmd = Command::new("cargo");
    cmd.args(["release", level, "--no-publish", "--no-push"]);
    cmd.arg(if dry_run { "--dry-run" } else { "--execute" });

    let status = cmd.status().context("Failed to run cargo release")?;
    if !status.success() {
        anyhow::bail!("cargo release failed with exit code: {:?}", status.code());
    }

    if dry_run {
        println!();
        println!("DRY RUN COMPLETE! No changes were made.");
        return Ok(());
    }

    println!();
    println!("[2/3] Bundling release build...");
    crate::bundle::run_bundle(true)?;

    println!();
    println!("[3/3] Pushing branch and tags...");
    for args in [&["push"][..], &["push", "--tags"][..]] {
        let status = Command::new("git")
            .args(args)
            .status()
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?;
        if !status.success() {
            anyhow::bail!("git {} failed with exit code: {:?}", args.join(" "), status.code());
        }
    }

    println!();
    println!("Release pushed. Upload {}/ to the extension store.", crate::bundle::DIST_DIR);
    Ok(())
}
