//! Build automation tasks for the wirepool workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use xshell::{Shell, cmd};

/// Crates whose unit tests run without the mock transports.
const LIBRARY_CRATES: &[&str] = &["wirepool-stats", "wirepool", "wirepool-terminus"];

/// Crate holding the mock transports and the cross-crate scenarios.
const INTEGRATION_CRATE: &str = "wirepool-testing";

/// Targets declared in `fuzz/Cargo.toml`.
const FUZZ_TARGETS: &[&str] = &["ring_buffer", "pool_config"];

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for wirepool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Suite {
    /// Unit and doc tests of the library crates
    Unit,
    /// Pool scenarios, adapters and shutdown against mock transports
    Integration,
    /// Both suites
    All,
}

#[derive(Subcommand)]
enum Command {
    /// Run every check CI runs: format, lint, both test suites, docs, deny
    Ci,
    /// Run cargo fmt --check
    Fmt,
    /// Run clippy over every target
    Clippy,
    /// Run a test suite
    Test {
        #[arg(value_enum, default_value_t = Suite::All)]
        suite: Suite,
    },
    /// Run cargo-deny checks
    Deny,
    /// Build the API docs with warnings denied
    Doc,
    /// Run the ring buffer and summary benchmarks
    Bench,
    /// Clean build artifacts
    Clean,
    /// Run fuzz targets for a bounded time (requires cargo-fuzz and nightly)
    Fuzz {
        /// Fuzz target name; every target when omitted
        target: Option<String>,
        /// Time budget per target in seconds
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh, Suite::All)?;
            doc(&sh)?;
            deny(&sh)?;
            println!("All CI checks passed!");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test { suite } => test(&sh, suite)?,
        Command::Deny => deny(&sh)?,
        Command::Doc => doc(&sh)?,
        Command::Bench => bench(&sh)?,
        Command::Clean => clean(&sh)?,
        Command::Fuzz { target, seconds } => match target {
            Some(target) => fuzz(&sh, &target, seconds)?,
            None => {
                for target in FUZZ_TARGETS {
                    fuzz(&sh, target, seconds)?;
                }
            }
        },
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)
        .context("invalid UTF-8 in cargo output")?
        .trim()
        .to_string();

    Ok(PathBuf::from(path)
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

fn package_args(crates: &[&str]) -> Vec<String> {
    crates
        .iter()
        .flat_map(|name| ["-p".to_string(), (*name).to_string()])
        .collect()
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell, suite: Suite) -> Result<()> {
    if matches!(suite, Suite::Unit | Suite::All) {
        println!("Running library tests...");
        let packages = package_args(LIBRARY_CRATES);
        cmd!(sh, "cargo test {packages...}").run()?;
    }
    if matches!(suite, Suite::Integration | Suite::All) {
        println!("Running mock transport scenarios...");
        cmd!(sh, "cargo test -p {INTEGRATION_CRATE}").run()?;
    }
    Ok(())
}

fn deny(sh: &Shell) -> Result<()> {
    println!("Running cargo-deny...");
    cmd!(sh, "cargo deny check").run()?;
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("Building documentation...");
    let packages = package_args(LIBRARY_CRATES);
    cmd!(sh, "cargo doc --no-deps {packages...}")
        .env("RUSTDOCFLAGS", "-D warnings")
        .run()?;
    Ok(())
}

fn bench(sh: &Shell) -> Result<()> {
    println!("Running benchmarks...");
    cmd!(sh, "cargo bench -p wirepool-stats").run()?;
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    cmd!(sh, "cargo clean").run()?;
    Ok(())
}

fn fuzz(sh: &Shell, target: &str, seconds: u64) -> Result<()> {
    if !FUZZ_TARGETS.contains(&target) {
        anyhow::bail!("unknown fuzz target `{target}`, expected one of {FUZZ_TARGETS:?}");
    }
    println!("Fuzzing {target} for {seconds}s...");
    let _dir = sh.push_dir("fuzz");
    let budget = format!("-max_total_time={seconds}");
    cmd!(sh, "cargo +nightly fuzz run {target} -- {budget}").run()?;
    Ok(())
}
