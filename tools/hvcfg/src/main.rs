// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Host tool turning nexus-hv TOML configurations into loader descriptors
//! OWNERS: @tools-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: tests/cli.rs
//!
//! PUBLIC API:
//!   - CLI: hvcfg cell <in.toml> -o <out.cell>
//!   - CLI: hvcfg system <in.toml> -o <out.sys>
//!   - CLI: hvcfg inspect <file>
//!
//! DEPENDENCIES:
//!   - clap: argument parsing
//!   - nexus-hv-config: TOML schema and compiler
//!
//! ADR: docs/adr/0030-hypervisor-partitioning.md

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "hvcfg", about = "nexus-hv configuration compiler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a cell file into a cell descriptor.
    Cell {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Compile a system file into a system configuration.
    System {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print a summary of a compiled cell or system configuration.
    Inspect { file: PathBuf },
}

fn compile(input: &Path, output: &Path, compiler: fn(&str) -> nexus_hv_config::Result<Vec<u8>>) -> Result<(), String> {
    let text = fs::read_to_string(input).map_err(|err| format!("read {}: {err}", input.display()))?;
    let bytes = compiler(&text).map_err(|err| format!("{}: {err}", input.display()))?;
    fs::write(output, &bytes).map_err(|err| format!("write {}: {err}", output.display()))?;
    println!("{}: {} bytes", output.display(), bytes.len());
    Ok(())
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Cell { input, output } => compile(&input, &output, nexus_hv_config::compile_cell_str),
        Command::System { input, output } => compile(&input, &output, nexus_hv_config::compile_system_str),
        Command::Inspect { file } => {
            let bytes = fs::read(&file).map_err(|err| format!("read {}: {err}", file.display()))?;
            let descriptor = nexus_hv_config::inspect(&bytes).map_err(|err| format!("{}: {err}", file.display()))?;
            print!("{descriptor}");
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("hvcfg: {message}");
            ExitCode::FAILURE
        }
    }
}
