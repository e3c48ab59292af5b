/*!
 * Collate CLI - Command Line Interface
 */

use clap::{ArgAction, Args, Parser, Subcommand};
use collate::{
    compression::decompress_file,
    config::{Codec, CompressConfig, RunConfig},
    core::SharedQueue,
    error::{CollateError, Result, EXIT_SUCCESS},
    logging, pipeline, RunStats, ThreadWorld,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "collate")]
#[command(version, about = "Parallel bulk compression and tree copy across cooperating workers", long_about = None)]
struct Cli {
    /// Number of cooperating workers (0 = one per CPU)
    #[arg(short = 'w', long, global = true, value_name = "N")]
    workers: Option<usize>,

    /// Load settings from a TOML file; flags override it
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v info with progress, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write JSON logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Print the final statistics as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress files, each split across all workers
    Compress(CompressArgs),

    /// Copy files and directory trees
    Copy(CopyArgs),

    /// Decompress a (multi-frame) zstd file
    Decompress(DecompressArgs),
}

#[derive(Args)]
struct CompressArgs {
    /// Keep the original files
    #[arg(short = 'k', long)]
    keep: bool,

    /// Overwrite existing compressed files
    #[arg(short = 'f', long)]
    force: bool,

    /// Suffix for compressed files (defaults to the codec's own)
    #[arg(short = 'S', long, value_name = "SUFFIX")]
    suffix: Option<String>,

    /// Zstd compression level (1-22)
    #[arg(short = 'l', long, value_parser = clap::value_parser!(i32).range(1..=22))]
    level: Option<i32>,

    /// External compressor run on each segment as `PROGRAM ARGS... FILE`
    #[arg(long, value_name = "PROGRAM")]
    program: Option<String>,

    /// Argument passed to the external compressor (repeatable)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true, requires = "program")]
    program_args: Vec<String>,

    /// Suffix the external compressor appends to its output
    #[arg(long, value_name = "SUFFIX", default_value = ".gz", requires = "program")]
    program_suffix: String,

    /// Files to compress
    #[arg(required = true, value_name = "FILES")]
    files: Vec<PathBuf>,
}

#[derive(Args)]
struct CopyArgs {
    /// Copy directories recursively
    #[arg(short = 'r', short_alias = 'R', long)]
    recursive: bool,

    /// Do not overwrite existing files
    #[arg(short = 'n', long)]
    no_clobber: bool,

    /// Always follow symbolic links in sources
    #[arg(short = 'L', long, conflicts_with = "no_dereference")]
    dereference: bool,

    /// Never follow symbolic links in sources
    #[arg(short = 'P', long)]
    no_dereference: bool,

    /// Preserve mode, ownership and timestamps
    #[arg(short = 'p', long)]
    preserve: bool,

    /// Same as -r -P -p
    #[arg(short = 'a', long)]
    archive: bool,

    /// Files larger than this are split into segments (bytes)
    #[arg(long, value_name = "BYTES")]
    segment_size: Option<u64>,

    /// Compare blake3 digests of each written segment with the source
    #[arg(long)]
    verify: bool,

    /// Sources followed by the destination
    #[arg(required = true, num_args = 2.., value_name = "PATHS")]
    paths: Vec<PathBuf>,
}

#[derive(Args)]
struct DecompressArgs {
    /// Compressed input
    file: PathBuf,

    /// Output path (defaults to the input without its .zst suffix)
    #[arg(short = 'o', long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Overwrite an existing output
    #[arg(short = 'f', long)]
    force: bool,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RunConfig::from_file(path)
            .map_err(|e| CollateError::Config(format!("Failed to load config file: {}", e)))?,
        None => RunConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }

    if let Err(e) = logging::init_logging(config.log_level, cli.verbose, config.log_file.as_deref()) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Compress(args) => run_compress(args, config, cli.verbose, cli.json),
        Commands::Copy(args) => run_copy(args, config, cli.verbose, cli.json),
        Commands::Decompress(args) => run_decompress(args, cli.json),
    }
}

fn run_compress(args: CompressArgs, mut config: RunConfig, verbose: u8, json: bool) -> Result<i32> {
    apply_compress_args(&args, &mut config.compress, verbose);
    if config.compress.output_suffix().is_empty() {
        return Err(CollateError::Config("suffix must not be empty".to_string()));
    }

    let world = ThreadWorld::new(config.effective_workers())?;
    let compress = &config.compress;
    let files = &args.files;
    let per_rank = world.run(|comm| pipeline::compress_files(&comm, files, compress))?;

    report("Compression", first(per_rank)?, json)
}

/// Fold compress flags over the loaded settings
///
/// `-S` names the final output only; the file the external tool leaves
/// behind is `--program-suffix`.
fn apply_compress_args(args: &CompressArgs, compress: &mut CompressConfig, verbose: u8) {
    compress.keep |= args.keep;
    compress.force |= args.force;
    compress.verbosity = compress.verbosity.max(verbose);
    if args.suffix.is_some() {
        compress.suffix = args.suffix.clone();
    }

    if let Some(program) = &args.program {
        compress.codec = Codec::Command {
            program: program.clone(),
            args: args.program_args.clone(),
            suffix: args.program_suffix.clone(),
        };
    } else if let Some(level) = args.level {
        compress.codec = Codec::Zstd { level };
    }
}

fn run_copy(args: CopyArgs, mut config: RunConfig, verbose: u8, json: bool) -> Result<i32> {
    let policy = &mut config.copy;
    if args.archive {
        policy.recursive = true;
        policy.dereference = false;
        policy.preserve = true;
    }
    policy.recursive |= args.recursive;
    policy.preserve |= args.preserve;
    policy.verify |= args.verify;
    policy.verbosity = policy.verbosity.max(verbose);
    if args.no_clobber {
        policy.clobber = false;
    }
    if args.dereference {
        policy.dereference = true;
    } else if args.no_dereference {
        policy.dereference = false;
    }
    if let Some(segment_size) = args.segment_size {
        policy.segment_size = segment_size;
    }
    if policy.segment_size == 0 {
        return Err(CollateError::Config("segment size must be positive".to_string()));
    }

    let Some((target, sources)) = args.paths.split_last() else {
        return Err(CollateError::Validation("missing destination operand".to_string()));
    };

    let world = ThreadWorld::new(config.effective_workers())?;
    let queue = SharedQueue::new();
    let policy = &config.copy;
    let per_rank =
        world.run(|comm| pipeline::copy_tree(&comm, &queue, sources, target, policy))?;

    let stats = first(per_rank)??;
    tracing::debug!(
        "Queue: {} directory items, {} file items, {} dequeued",
        queue.stats().directory_items(),
        queue.stats().file_items(),
        queue.stats().dequeued()
    );
    report("Copy", stats, json)
}

fn run_decompress(args: DecompressArgs, json: bool) -> Result<i32> {
    let output = match args.output {
        Some(path) => path,
        None => strip_suffix(&args.file, ".zst").ok_or_else(|| {
            CollateError::Validation(format!(
                "{}: unknown suffix; use --output",
                args.file.display()
            ))
        })?,
    };
    if !args.force && output.exists() {
        return Err(CollateError::Validation(format!(
            "{} already exists; use --force to overwrite",
            output.display()
        )));
    }

    let started = std::time::Instant::now();
    let decoded = decompress_file(&args.file, &output)?;
    let mut stats = RunStats {
        files: 1,
        bytes_read: std::fs::metadata(&args.file)?.len(),
        bytes_written: decoded,
        ..RunStats::default()
    };
    stats.set_duration(started.elapsed());
    report("Decompression", stats, json)
}

/// Every rank holds the reduced totals; rank 0 speaks for the run
fn first<T>(per_rank: Vec<T>) -> Result<T> {
    per_rank
        .into_iter()
        .next()
        .ok_or_else(|| CollateError::Parallel("no ranks ran".to_string()))
}

fn strip_suffix(path: &Path, suffix: &str) -> Option<PathBuf> {
    let name = path.to_str()?;
    name.strip_suffix(suffix)
        .filter(|stem| !stem.is_empty())
        .map(PathBuf::from)
}

fn report(operation: &str, stats: RunStats, json: bool) -> Result<i32> {
    if json {
        let rendered = serde_json::to_string_pretty(&stats)
            .map_err(|e| CollateError::Config(format!("Failed to render JSON: {}", e)))?;
        println!("{}", rendered);
    } else {
        println!("{} complete", operation);
        println!("{}", stats);
    }

    let code = stats.exit_code();
    if code != EXIT_SUCCESS {
        eprintln!("{} finished with {} failure(s)", operation, stats.failed);
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compress_config(argv: &[&str]) -> CompressConfig {
        let cli = Cli::try_parse_from(argv).unwrap();
        let Commands::Compress(args) = cli.command else {
            panic!("expected the compress subcommand");
        };
        let mut config = CompressConfig::default();
        apply_compress_args(&args, &mut config, cli.verbose);
        config
    }

    #[test]
    fn test_output_suffix_independent_of_program_output() {
        let config = compress_config(&["collate", "compress", "--program", "gzip", "-S", ".gzip", "f"]);
        assert_eq!(config.output_suffix(), ".gzip");
        assert!(matches!(&config.codec, Codec::Command { suffix, .. } if suffix == ".gz"));

        let config = compress_config(&[
            "collate",
            "compress",
            "--program",
            "xz",
            "--program-suffix",
            ".xz",
            "f",
        ]);
        assert_eq!(config.output_suffix(), ".xz");
    }

    #[test]
    fn test_zstd_level_and_flags() {
        let config = compress_config(&["collate", "-v", "compress", "-k", "-l", "9", "f"]);
        assert!(config.keep);
        assert_eq!(config.verbosity, 1);
        assert_eq!(config.codec, Codec::Zstd { level: 9 });
        assert_eq!(config.output_suffix(), ".zst");
    }

    #[test]
    fn test_program_suffix_requires_program() {
        assert!(Cli::try_parse_from(["collate", "compress", "--program-suffix", ".xz", "f"]).is_err());
    }
}
