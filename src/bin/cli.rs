//! blobpack CLI
//!
//! Command-line interface for a local pack store.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use blobpack::blob::HashAlgorithm;
use blobpack::config::IndexKind;
use blobpack::{BlobError, BlobRef, BlobStorage, Config, PackEngine, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// blobpack CLI
#[derive(Parser, Debug)]
#[command(name = "blobpack")]
#[command(about = "Content-addressed blob pack storage")]
#[command(version)]
struct Args {
    /// Pack directory, or device path with --device
    #[arg(short, long, default_value = "./blobpack_data")]
    root: PathBuf,

    /// Treat root as a raw device split into fixed-size regions
    #[arg(long, requires = "region_size")]
    device: bool,

    /// Region size in bytes for --device
    #[arg(long)]
    region_size: Option<u64>,

    /// Pack rotation threshold in MB (file mode)
    #[arg(short = 'm', long, default_value = "512")]
    max_pack_mb: u64,

    /// Keep the index in memory and rebuild it from packs at open
    #[arg(long)]
    memory_index: bool,

    /// Location of the log index
    #[arg(long)]
    index_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a file and print its ref
    Put {
        /// The file to store
        file: PathBuf,

        /// Hash algorithm for the ref
        #[arg(long, default_value = "sha1")]
        algo: String,
    },

    /// Write a blob's contents to stdout or a file
    Get {
        /// The blob ref
        blob: String,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print sizes of the stored blobs among the given refs
    Stat {
        blobs: Vec<String>,
    },

    /// List stored blobs in ref order
    List {
        /// Start after this ref
        #[arg(long)]
        after: Option<String>,

        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Delete blobs from the index
    Delete {
        blobs: Vec<String>,
    },

    /// Rebuild the index from pack contents
    Reindex,

    /// Compare the index against pack contents
    Audit,

    /// Start a new pack
    Rotate,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blobpack=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let engine = match build_config(&args).and_then(PackEngine::open) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open pack store: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = run(&engine, args.command);
    if let Err(e) = engine.close() {
        tracing::error!("Failed to close pack store: {}", e);
        std::process::exit(1);
    }
    match outcome {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Pack rotation threshold in bytes
fn pack_size_bytes(mb: u64) -> Result<u64> {
    mb.checked_mul(1024 * 1024).ok_or_else(|| {
        BlobError::Config(format!("max pack size of {} MB does not fit in 64 bits", mb))
    })
}

fn build_config(args: &Args) -> Result<Config> {
    let mut builder = Config::builder()
        .root(&args.root)
        .max_pack_size(pack_size_bytes(args.max_pack_mb)?);
    if args.device {
        builder = builder.raw_device(args.region_size.unwrap_or_default());
    }
    if args.memory_index {
        builder = builder.index(IndexKind::Memory);
    }
    if let Some(path) = &args.index_path {
        builder = builder.index_path(path);
    }
    Ok(builder.build())
}

fn parse_refs(raw: &[String]) -> Result<Vec<BlobRef>> {
    raw.iter().map(|s| s.parse()).collect()
}

/// Runs one command, returning the process exit code
fn run(engine: &PackEngine, command: Commands) -> Result<i32> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Put { file, algo } => {
            let algo = HashAlgorithm::from_name(&algo).ok_or_else(|| {
                BlobError::Config(format!("unknown hash algorithm: {}", algo))
            })?;
            let data = std::fs::read(&file)?;
            let blob = BlobRef::compute(algo, &data);
            let stored = engine.receive_bytes(&blob, &data)?;
            writeln!(out, "{}", stored)?;
        }
        Commands::Get { blob, output } => {
            let data = engine.fetch(&blob.parse()?)?;
            match output {
                Some(path) => File::create(path)?.write_all(&data)?,
                None => out.write_all(&data)?,
            }
        }
        Commands::Stat { blobs } => {
            for sized in engine.stat(&parse_refs(&blobs)?)? {
                writeln!(out, "{}\t{}", sized.blob_ref, sized.size)?;
            }
        }
        Commands::List { after, limit } => {
            let after = after.map(|s| s.parse::<BlobRef>()).transpose()?;
            for sized in engine.enumerate(after.as_ref(), limit)? {
                writeln!(out, "{}\t{}", sized.blob_ref, sized.size)?;
            }
        }
        Commands::Delete { blobs } => {
            engine.remove(&parse_refs(&blobs)?)?;
        }
        Commands::Reindex => {
            let report = engine.reindex()?;
            writeln!(
                out,
                "records={} indexed={} invalid={} damaged_packs={}",
                report.records,
                report.indexed,
                report.invalid,
                report.damaged.len()
            )?;
        }
        Commands::Audit => {
            let report = engine.audit()?;
            writeln!(
                out,
                "records={} invalid={} matched={} missing={} mismatched={} dangling={} damaged_packs={}",
                report.records,
                report.invalid,
                report.matched,
                report.missing.len(),
                report.mismatched.len(),
                report.dangling.len(),
                report.damaged.len()
            )?;
            for blob in &report.mismatched {
                writeln!(out, "mismatched\t{}", blob)?;
            }
            for blob in &report.dangling {
                writeln!(out, "dangling\t{}", blob)?;
            }
            for scan in &report.damaged {
                writeln!(out, "damaged\tpack {} at {}: {:?}", scan.pack_id, scan.end, scan.stop)?;
            }
            if !report.is_consistent() {
                return Ok(2);
            }
        }
        Commands::Rotate => {
            let pack_id = engine.next_pack()?;
            writeln!(out, "pack {}", pack_id)?;
        }
    }
    Ok(0)
}
