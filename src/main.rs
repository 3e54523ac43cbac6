use chipscore::compiler::kernel::Kernel;
use chipscore::compiler::{CompileOptions, Compiler, Compression};
use chipscore::output::Dialect;
use chipscore::project::Expansion;
use clap::{Parser, ValueEnum};
use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chipscore")]
#[command(version = "0.1.0")]
#[command(about = "Tracker project to 8-bit sound driver data compiler", long_about = None)]
struct Args {
    /// Input project (JSON, optionally gzip compressed)
    #[arg(required_unless_present = "list_expansions")]
    input: Option<PathBuf>,

    /// Output assembler source
    #[arg(required_unless_present = "list_expansions")]
    output: Option<PathBuf>,

    /// Also write the assembled song data
    #[arg(long)]
    bin: Option<PathBuf>,

    /// Also write the assembled DPCM samples
    #[arg(long)]
    dpcm_bin: Option<PathBuf>,

    /// Write a JSON size report
    #[arg(long)]
    report: Option<PathBuf>,

    /// JSON file with compile options; flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    kernel: Option<KernelArg>,

    #[arg(short, long, value_enum)]
    dialect: Option<DialectArg>,

    /// Song index to compile (repeatable, default all)
    #[arg(short, long = "song")]
    songs: Vec<usize>,

    /// Label prefix
    #[arg(short, long)]
    prefix: Option<String>,

    /// Disable back-reference compression
    #[arg(long, conflicts_with = "threshold")]
    no_compress: bool,

    /// Fixed minimum note count per back-reference
    #[arg(short, long)]
    threshold: Option<usize>,

    /// List supported expansion chips
    #[arg(short = 'L', long)]
    list_expansions: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KernelArg {
    Classic,
    Extended,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DialectArg {
    Ca65,
    Asm6,
}

fn options(args: &Args) -> Result<CompileOptions, chipscore::Error> {
    let mut options = match &args.config {
        Some(path) => CompileOptions::load(path)?,
        None => CompileOptions::default(),
    };

    if let Some(kernel) = args.kernel {
        options.kernel = match kernel {
            KernelArg::Classic => Kernel::Classic,
            KernelArg::Extended => Kernel::Extended,
        };
    }
    if let Some(dialect) = args.dialect {
        options.dialect = match dialect {
            DialectArg::Ca65 => Dialect::Ca65,
            DialectArg::Asm6 => Dialect::Asm6,
        };
    }
    if !args.songs.is_empty() {
        options.songs = Some(args.songs.clone());
    }
    if let Some(prefix) = &args.prefix {
        options.label_prefix = prefix.clone();
    }
    if args.no_compress {
        options.compression = Compression::Off;
    }
    if let Some(threshold) = args.threshold {
        options.compression = Compression::Fixed(threshold);
    }
    Ok(options)
}

fn main() -> Result<(), chipscore::Error> {
    // Warnings are printed below; RUST_LOG=debug adds compression statistics
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if args.list_expansions {
        for expansion in Expansion::all() {
            println!("{}", expansion.name());
        }
        return Ok(());
    }

    let (Some(input), Some(output)) = (&args.input, &args.output) else {
        let message = "input and output are required";
        return Err(io::Error::new(io::ErrorKind::InvalidInput, message).into());
    };

    let compiler = Compiler::with_options(options(&args)?);
    let score = compiler.compile_file(input, output)?;

    for warning in &score.warnings {
        eprintln!("Warning: {}", warning);
    }

    if let Some(path) = &args.bin {
        fs::write(path, &score.music)?;
    }
    if let Some(path) = &args.dpcm_bin {
        fs::write(path, &score.samples)?;
    }
    if let Some(path) = &args.report {
        fs::write(path, score.report.to_json()?)?;
    }

    Ok(())
}
