//! QC-Block-Log: Quantum-Chain block log operator tool
//!
//! Inspects, verifies and repairs a block log directory. Every command
//! prints one JSON document to stdout; logs go to stderr and follow
//! `RUST_LOG`.
//!
//! Configuration starts from `QC_BLOCK_LOG_*` environment variables and is
//! then overridden by the command-line flags.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use qc_02_block_log::{BlockLogConfig, LogSetManager, SplitPolicy, StoreDependencies};
use serde_json::{json, Value};
use shared_types::{BlockHandle, CancellationFlag};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// QC-Block-Log: Quantum-Chain block log operator tool
#[derive(Parser, Debug)]
#[command(name = "qc-block-log")]
#[command(about = "Inspect, verify and repair Quantum-Chain block logs")]
struct Args {
    /// Block log directory (overrides QC_BLOCK_LOG_DIR)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Layout: monolithic, all, or the number of parts to keep
    #[arg(long, value_parser = parse_split)]
    split: Option<SplitPolicy>,

    /// Blocks per part for split layouts
    #[arg(long)]
    blocks_per_part: Option<u32>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Head, tail, parts and counters of the log
    Info,
    /// Print one block by number
    GetBlock {
        block_num: u32,
        /// Include the uncompressed block bytes as hex
        #[arg(long)]
        hex: bool,
    },
    /// Rebuild every artifacts file from its log. The log must not be open
    /// elsewhere.
    RegenerateArtifacts,
    /// Read back and check every stored block
    Verify,
}

fn parse_split(value: &str) -> Result<SplitPolicy, String> {
    SplitPolicy::parse(value)
        .ok_or_else(|| format!("expected monolithic, all or a part count, got {value:?}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let output = match &args.command {
        Command::Info => info_command(config)?,
        Command::GetBlock { block_num, hex } => get_block_command(config, *block_num, *hex)?,
        Command::RegenerateArtifacts => regenerate_command(&config)?,
        Command::Verify => verify_command(config)?,
    };

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    }
    .context("Failed to render output")?;
    println!("{rendered}");
    Ok(())
}

fn build_config(args: &Args) -> Result<BlockLogConfig> {
    let mut config = BlockLogConfig::default();
    config
        .apply_env_overrides()
        .context("Invalid QC_BLOCK_LOG_* environment")?;

    if let Some(dir) = &args.dir {
        config.data_dir = dir.clone();
    }
    if let Some(split) = args.split {
        let blocks_per_part = args.blocks_per_part.unwrap_or(config.blocks_per_part);
        config = config.with_split(split, blocks_per_part);
    } else if let Some(blocks_per_part) = args.blocks_per_part {
        let split = config.split;
        config = config.with_split(split, blocks_per_part);
    }

    if !config.data_dir.is_dir() {
        bail!("Block log directory {} does not exist", config.data_dir.display());
    }
    Ok(config)
}

fn open_read_only(config: BlockLogConfig) -> Result<LogSetManager> {
    let dir = config.data_dir.clone();
    LogSetManager::open_with(config.with_read_only(true), StoreDependencies::default())
        .with_context(|| format!("Failed to open block log at {}", dir.display()))
}

// =============================================================================
// COMMANDS
// =============================================================================

fn info_command(config: BlockLogConfig) -> Result<Value> {
    let log = open_read_only(config)?;
    let output = json!({
        "data_dir": log.config().data_dir,
        "split": log.config().split,
        "blocks_per_part": log.config().blocks_per_part,
        "head_block_num": log.head_block_num(),
        "head_block_id": log.head_block_id().map(|id| id.to_string()),
        "tail_block_num": log.tail_block_num(),
        "parts": log.parts_info(),
        "metrics": log.metrics().snapshot(),
    });
    log.close().context("Failed to close block log")?;
    Ok(output)
}

fn get_block_command(config: BlockLogConfig, block_num: u32, hex: bool) -> Result<Value> {
    let log = open_read_only(config)?;
    let block = log
        .read_block_by_num(block_num)
        .with_context(|| format!("Failed to read block #{block_num}"))?;
    let (head, tail) = (log.head_block_num(), log.tail_block_num());
    log.close().context("Failed to close block log")?;

    match block {
        Some(block) => Ok(describe_block(&block, hex)),
        None => bail!(
            "Block #{} is not in the log (head #{}, tail {:?})",
            block_num,
            head,
            tail
        ),
    }
}

fn describe_block(block: &BlockHandle, hex: bool) -> Value {
    let header = block.header();
    let mut output = json!({
        "block_num": block.block_num(),
        "id": block.id().to_string(),
        "previous": block.previous_id().to_string(),
        "timestamp": header.timestamp,
        "producer": header.producer,
        "transactions": block.block().transactions.len(),
        "uncompressed_size": block.uncompressed_size(),
        "compressed_size": block.compressed_size(),
    });
    if hex {
        output["bytes"] = Value::String(hex::encode(block.uncompressed_bytes()));
    }
    output
}

fn regenerate_command(config: &BlockLogConfig) -> Result<Value> {
    info!(
        "[qc-block-log] Regenerating artifacts under {}",
        config.data_dir.display()
    );
    let reports = LogSetManager::regenerate_artifacts(config, &CancellationFlag::new())
        .context("Artifacts regeneration failed")?;
    Ok(json!({ "regenerated": reports }))
}

fn verify_command(config: BlockLogConfig) -> Result<Value> {
    let log = open_read_only(config)?;
    let report = log.verify().context("Verification failed")?;
    log.close().context("Failed to close block log")?;
    Ok(json!({ "ok": true, "report": report }))
}
