//! xtask: Development tasks for tunring
//!
//! Run with: `cargo xtask <command>`

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use xshell::{cmd, Shell};

const WINDOWS_TARGET: &str = "x86_64-pc-windows-msvc";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development tasks for tunring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests (workspace + fuzz harnesses)
    Test,
    /// Run fuzz tests with bolero
    Fuzz {
        /// Target to fuzz ("packet_ring" or "session").
        /// If not specified, runs all fuzz harnesses in test mode (quick smoke test)
        target: Option<String>,
    },
    /// Run the Wintun conformance tests (Windows, elevated, wintun.dll on PATH)
    Wintun,
    /// Run the in-memory loopback example
    Loopback,
    /// Run clippy on all code
    Clippy {
        /// Also lint the Windows-only crates for the MSVC target
        #[arg(long)]
        windows: bool,
    },
    /// Check formatting
    Fmt {
        /// Fix formatting issues instead of just checking
        #[arg(long)]
        fix: bool,
    },
}

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Workspace root (where Cargo.toml with [workspace] lives).
fn workspace_root() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let manifest_dir = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => std::env::current_dir()?.join("xtask"),
    };
    Ok(manifest_dir
        .parent()
        .ok_or("xtask has no parent directory")?
        .to_path_buf())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Commands::Test => {
            println!("=== Running workspace tests ===");

            // Try nextest first, fall back to cargo test
            if cmd!(sh, "cargo nextest --version").quiet().run().is_ok() {
                println!("Using cargo-nextest");
                cmd!(sh, "cargo nextest run --workspace").run()?;
            } else {
                println!("cargo-nextest not found, using cargo test");
                cmd!(sh, "cargo test --workspace").run()?;
            }
            // nextest skips doctests
            cmd!(sh, "cargo test --workspace --doc").run()?;

            println!("\n=== Running fuzz harnesses (test mode) ===");
            sh.change_dir(workspace_root.join("fuzz"));
            cmd!(sh, "cargo test").run()?;

            println!("\n=== All tests passed ===");
        }
        Commands::Fuzz { target } => {
            sh.change_dir(workspace_root.join("fuzz"));

            if let Some(t) = target {
                println!("=== Fuzzing target: {t} ===");
                println!("Press Ctrl+C to stop.\n");

                // Check if cargo-bolero is installed
                if cmd!(sh, "cargo bolero --version").quiet().run().is_err() {
                    eprintln!("cargo-bolero not found. Install with:");
                    eprintln!("  cargo install cargo-bolero");
                    return Err("cargo-bolero not installed".into());
                }

                cmd!(sh, "cargo bolero test {t}").run()?;
            } else {
                println!("=== Running all fuzz harnesses in test mode ===");
                println!("(For real fuzzing, specify a target: cargo xtask fuzz session)\n");
                println!("Available targets:");
                println!("  - packet_ring  (PacketRing alloc/commit/pop/release)");
                println!("  - session      (Session send/receive over MemDriver)\n");

                cmd!(sh, "cargo test").run()?;
            }
        }
        Commands::Wintun => {
            if !cfg!(windows) {
                return Err("the Wintun tests only run on Windows".into());
            }
            println!("=== Running Wintun conformance tests ===");
            println!("(needs an elevated shell and wintun.dll on the DLL search path)\n");
            cmd!(
                sh,
                "cargo test -p tunring-wintun -- --ignored --test-threads=1"
            )
            .run()?;
        }
        Commands::Loopback => {
            let _env = sh.push_env("RUST_LOG", "info,tunring=debug");
            cmd!(sh, "cargo run -p tunring --example loopback").run()?;
        }
        Commands::Clippy { windows } => {
            println!("=== Running clippy ===");
            cmd!(sh, "cargo clippy --workspace --all-features --all-targets -- -D warnings")
                .run()?;

            if windows {
                println!("\n=== Clippy for {WINDOWS_TARGET} ===");
                cmd!(
                    sh,
                    "cargo clippy -p tunring-wintun --all-targets --target {WINDOWS_TARGET} -- -D warnings"
                )
                .run()?;
            }

            println!("\n=== Clippy on fuzz crate ===");
            sh.change_dir(workspace_root.join("fuzz"));
            cmd!(sh, "cargo clippy --all-targets -- -D warnings").run()?;
        }
        Commands::Fmt { fix } => {
            if fix {
                println!("=== Fixing formatting ===");
                cmd!(sh, "cargo fmt --all").run()?;
                sh.change_dir(workspace_root.join("fuzz"));
                cmd!(sh, "cargo fmt").run()?;
            } else {
                println!("=== Checking formatting ===");
                cmd!(sh, "cargo fmt --all -- --check").run()?;
                sh.change_dir(workspace_root.join("fuzz"));
                cmd!(sh, "cargo fmt -- --check").run()?;
            }
        }
    }

    Ok(())
}
