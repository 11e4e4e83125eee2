use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

pub const WASM_TARGET: &str = "wasm32-unknown-unknown";
pub const CRATE_NAME: &str = "playrate";

/// Unpacked extension output
pub const DIST_DIR: &str = "dist";

/// Static extension sources (manifest, loader)
pub const EXTENSION_DIR: &str = "extension";

/// Files the browser needs to load the content script
pub const REQUIRED_FILES: &[&str] = &[
    "manifest.json",
    "loader.js",
    "pkg/playrate.js",
    "pkg/playrate_bg.wasm",
];

fn profile_dir(release: bool) -> &'static str {
    if release { "release" } else { "debug" }
}

/// Path of the compiled wasm module for a profile
pub fn wasm_artifact(release: bool) -> PathBuf {
    PathBuf::from("target")
        .join(WASM_TARGET)
        .join(profile_dir(release))
        .join(format!("{}.wasm", CRATE_NAME))
}

/// Step 1: cargo build --lib for wasm32
pub fn build_wasm(release: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.args(["build", "--lib", "--package", CRATE_NAME, "--target", WASM_TARGET]);
    if release {
        cmd.arg("--release");
    }

    let status = cmd.status().context("Failed to run cargo build")?;
    if !status.success() {
        anyhow::bail!("wasm build failed with exit code: {:?}", status.code());
    }
    Ok(())
}

/// Step 2: wasm-bindgen --target web into dist/pkg
pub fn run_bindgen(release: bool) -> Result<()> {
    let artifact = wasm_artifact(release);
    if !artifact.exists() {
        anyhow::bail!("Missing wasm artifact: {}", artifact.display());
    }

    let out_dir = Path::new(DIST_DIR).join("pkg");
    let status = Command::new("wasm-bindgen")
        .arg(&artifact)
        .args(["--target", "web", "--no-typescript", "--out-dir"])
        .arg(&out_dir)
        .status()
        .context("Failed to run wasm-bindgen (install with: cargo install wasm-bindgen-cli)")?;

    if !status.success() {
        anyhow::bail!("wasm-bindgen failed with exit code: {:?}", status.code());
    }
    Ok(())
}

/// Step 3: copy extension/ sources next to the generated package
pub fn copy_extension() -> Result<usize> {
    let src = Path::new(EXTENSION_DIR);
    if !src.exists() {
        anyhow::bail!("{}/ directory not found", EXTENSION_DIR);
    }

    let dist = Path::new(DIST_DIR);
    let mut copied = 0;
    for entry in WalkDir::new(src).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(src)?;
        let dest = dist.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::copy(entry.path(), &dest)
            .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        println!("  ✓ {}", rel.display());
        copied += 1;
    }
    Ok(copied)
}

/// Remove a previous dist/ so stale files never ship
pub fn clean_dist() -> Result<()> {
    let dist = Path::new(DIST_DIR);
    if dist.exists() {
        fs_extra::dir::remove(dist).context("Failed to remove existing dist directory")?;
    }
    fs::create_dir_all(dist).context("Failed to create dist directory")?;
    Ok(())
}

/// Check that every required file landed in dist/
pub fn verify_dist() -> Result<()> {
    let dist = Path::new(DIST_DIR);
    let mut missing = Vec::new();

    for file in REQUIRED_FILES {
        if dist.join(file).exists() {
            println!("  ✓ {}", file);
        } else {
            println!("  ✗ {}", file);
            missing.push(*file);
        }
    }

    if !missing.is_empty() {
        anyhow::bail!("Missing {} file(s) in {}/: {}", missing.len(), DIST_DIR, missing.join(", "));
    }
    Ok(())
}

/// Build, bind, assemble and verify the unpacked extension
pub fn run_bundle(release: bool) -> Result<()> {
    println!("========================================");
    println!("Bundling {} extension ({})", CRATE_NAME, profile_dir(release));
    println!("========================================");
    println!();

    println!("[1/4] Building wasm library...");
    build_wasm(release)?;

    println!();
    println!("[2/4] Preparing {}/...", DIST_DIR);
    clean_dist()?;

    println!();
    println!("[3/4] Running wasm-bindgen...");
    run_bindgen(release)?;

    println!();
    println!("[4/4] Copying extension files...");
    let copied = copy_extension()?;
    println!("Copied {} file(s)", copied);

    println!();
    verify_dist()?;

    println!();
    println!("========================================");
    println!("Load {}/ as an unpacked extension", DIST_DIR);
    println!("========================================");
    Ok(())
}
