use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use arrow::util::pretty::pretty_format_batches;
use clap::{Parser, Subcommand};
use serde::Serialize;

use rusty_depot::inventory::{self, InventoryRecord};
use rusty_depot::product::PayloadData;
use rusty_depot::{Depot, DepotConfig, Product, ScanReport};

/// Catalog PDS4 data products on local disk.
#[derive(Debug, Parser)]
#[command(name = "rusty-depot", version)]
struct Cli {
    /// Depot configuration file (TOML).
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan directory trees and print the inventory.
    Scan(ScanArgs),

    /// Load one label and describe it.
    Inspect(InspectArgs),
}

#[derive(Debug, clap::Args)]
struct ScanArgs {
    /// Roots to scan. Defaults to the configured roots.
    roots: Vec<PathBuf>,

    /// Only look at the roots' direct entries.
    #[arg(long)]
    flat: bool,

    /// Print the inventory as CSV.
    #[arg(long, conflicts_with = "json")]
    csv: bool,

    /// Print the scan report and inventory as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, clap::Args)]
struct InspectArgs {
    /// Label file.
    label: PathBuf,

    /// Materialize one payload slot and print a preview.
    #[arg(long)]
    slot: Option<String>,

    /// Rows or values to preview.
    #[arg(long, default_value_t = 10)]
    rows: usize,
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    report: &'a ScanReport,
    inventory: &'a [InventoryRecord],
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => DepotConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => DepotConfig::default(),
    };
    match cli.cmd {
        Command::Scan(args) => scan(config, args),
        Command::Inspect(args) => inspect(&config, &args),
    }
}

fn scan(mut config: DepotConfig, args: ScanArgs) -> Result<()> {
    if args.flat {
        config.recursive = false;
    }
    if !args.roots.is_empty() {
        config.roots = args.roots;
    }
    if config.roots.is_empty() {
        bail!("no roots given and none configured");
    }

    let depot = Depot::with_config(config);
    let report = depot.scan_configured();
    let records = depot.inventory();

    if args.json {
        let output = ScanOutput {
            report: &report,
            inventory: &records,
        };
        serde_json::to_writer_pretty(io::stdout().lock(), &output)?;
        println!();
    } else if args.csv {
        inventory::write_csv(&records, io::stdout().lock())?;
    } else {
        for record in &records {
            println!("{:<16} {}", record.kind, record.lidvid);
        }
        for collision in &report.collisions {
            eprintln!(
                "collision: {} kept {}, discarded {}",
                collision.key,
                collision.kept.display(),
                collision.discarded.display()
            );
        }
        for issue in &report.errors {
            eprintln!("error: {}: {}", issue.path.display(), issue.error);
        }
        println!("{report}");
    }
    Ok(())
}

fn inspect(config: &DepotConfig, args: &InspectArgs) -> Result<()> {
    let product = Product::open(&args.label, &config.parser(), &config.classifier())
        .with_context(|| format!("loading {}", args.label.display()))?;

    let signature = product.signature();
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    println!("lidvid:           {}", product.identifying_key());
    println!("kind:             {}", product.kind_name());
    println!("product class:    {}", show(&signature.product_class));
    println!("product type:     {}", show(&signature.product_type));
    println!("instrument:       {}", show(&signature.instrument));
    println!("processing level: {}", show(&signature.processing_level));
    for desc in product.label().list_payload_descriptors() {
        println!(
            "slot {:<12} {} @ {} shape {:?}",
            desc.slot,
            desc.file.display(),
            desc.offset,
            desc.shape()
        );
    }

    let Some(slot) = &args.slot else {
        return Ok(());
    };
    let payload = product
        .payload(slot)
        .with_context(|| format!("reading slot '{slot}'"))?;
    match payload.data() {
        PayloadData::Table(batch) => {
            let preview = batch.slice(0, args.rows.min(batch.num_rows()));
            println!("{}", pretty_format_batches(&[preview])?);
        }
        PayloadData::Array(_) => {
            let values = payload.to_f64()?;
            let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
            let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
            let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = finite.iter().sum::<f64>() / finite.len().max(1) as f64;
            println!(
                "{} values, min {min}, max {max}, mean {mean:.4}",
                values.len()
            );
            println!("{:?}", &values[..args.rows.min(values.len())]);
        }
    }
    Ok(())
}
