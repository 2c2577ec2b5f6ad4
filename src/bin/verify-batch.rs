use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info, warn};

use log_chain::audit::{check_batches, BatchReport, EnrichedLogRecord};

fn main() -> Result<()> {
    let matches = Command::new("verify-batch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Recompute Merkle roots from an export of anchored log records")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("PATH")
                .help("JSONL file with one enriched record per line")
                .required(true),
        )
        .arg(
            Arg::new("batch-id")
                .short('b')
                .long("batch-id")
                .value_name("ID")
                .help("Only check this batch"),
        )
        .arg(
            Arg::new("merkle-root")
                .short('m')
                .long("merkle-root")
                .value_name("HASH")
                .requires("batch-id")
                .help("Expected Merkle root of the selected batch"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .help("Suppress output except errors"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");
    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let input = matches
        .get_one::<String>("input")
        .ok_or_else(|| anyhow!("--input is required"))?;
    let batch_id = matches.get_one::<String>("batch-id");
    let expected_root = matches.get_one::<String>("merkle-root");

    let mut records = load_records(Path::new(input))?;
    if let Some(batch_id) = batch_id {
        records.retain(|r| &r.batch_id == batch_id);
        if records.is_empty() {
            return Err(anyhow!("No records for batch {} in {}", batch_id, input));
        }
    }
    info!("Loaded {} records from {}", records.len(), input);

    let reports = check_batches(&records)?;
    let mut failures = 0;
    for report in &reports {
        if !print_report(report, verbose, quiet) {
            failures += 1;
        }
    }

    if let Some(expected) = expected_root {
        let actual = &reports[0].recomputed_root;
        if actual != expected {
            error!("Merkle root mismatch. Expected: {}, Got: {}", expected, actual);
            failures += 1;
        } else if !quiet {
            println!("✓ Merkle root matches expected value");
        }
    }

    if failures > 0 {
        error!("{} of {} batches failed verification", failures, reports.len());
        std::process::exit(1);
    }

    if !quiet {
        println!("✓ {} batches verified", reports.len());
    }
    Ok(())
}

fn load_records(path: &Path) -> Result<Vec<EnrichedLogRecord>> {
    let file = File::open(path).with_context(|| format!("Export file not found: {}", path.display()))?;

    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EnrichedLogRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping line {}: {}", number + 1, e),
        }
    }

    if records.is_empty() {
        return Err(anyhow!("Export is empty: {}", path.display()));
    }
    Ok(records)
}

/// Print one batch outcome; returns whether it verified
fn print_report(report: &BatchReport, verbose: bool, quiet: bool) -> bool {
    let valid = report.is_valid();
    if valid {
        if !quiet {
            println!("✓ {} ({} leaves) root {}", report.batch_id, report.count, report.recomputed_root);
        }
        return true;
    }

    println!("✗ {} ({} leaves)", report.batch_id, report.count);
    for recorded in &report.recorded_roots {
        if recorded != &report.recomputed_root {
            println!("  recorded root {} != recomputed {}", recorded, report.recomputed_root);
        }
    }
    if report.recorded_roots.len() > 1 {
        println!("  records disagree on the root ({} distinct)", report.recorded_roots.len());
    }
    if !report.missing_leaves.is_empty() {
        println!("  missing leaves: {:?}", report.missing_leaves);
    }
    if !report.forged_leaves.is_empty() {
        println!("  leaves with mismatched fingerprints: {:?}", report.forged_leaves);
    }
    if verbose {
        println!("  recomputed root: {}", report.recomputed_root);
    }
    false
}
