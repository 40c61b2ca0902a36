use std::path::PathBuf;
use std::process::ExitCode;

use basket_pairs::generate::{default_output, generate_dataset, DatasetShape, MAX_SCALE};
use basket_pairs::pipeline::{default_workers, DEFAULT_LINE_LIMIT};
use basket_pairs::{run_pipeline, PipelineConfig, PipelineError};
use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "basket-pairs",
    version,
    about = "Count product pair co-occurrence across baskets",
    long_about = "Split a basket_id,product_id CSV into basket-preserving chunks, count product pairs per chunk, and merge the counts into one report with bounded memory.",
    args_conflicts_with_subcommands = true,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the pair-count report (default)
    Run(RunArgs),
    /// Generate a random basket dataset
    Generate(GenerateArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(
        long = "gzip_filename",
        value_name = "PATH",
        default_value = "data_1.csv.gz",
        help = "Input CSV of basket_id,product_id rows (gzip or plain)"
    )]
    gzip_filename: PathBuf,
    #[arg(
        long = "reportfile",
        value_name = "PATH",
        default_value = "report.csv",
        help = "Output report path"
    )]
    reportfile: PathBuf,
    #[arg(
        long = "line_limit",
        value_name = "N",
        default_value_t = DEFAULT_LINE_LIMIT,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Approximate number of rows per chunk file"
    )]
    line_limit: u64,
    #[arg(
        long = "work_dir",
        value_name = "DIR",
        default_value = ".",
        help = "Directory for intermediate chunk files"
    )]
    work_dir: PathBuf,
    #[arg(
        long,
        value_name = "N",
        value_parser = parse_positive_usize,
        help = "Chunks counted concurrently (default: available cores)"
    )]
    workers: Option<usize>,
    #[arg(
        long = "keep_intermediates",
        help = "Leave chunk and pair-count files in the work directory"
    )]
    keep_intermediates: bool,
    #[arg(
        long = "summary_json",
        value_name = "PATH",
        help = "Write a JSON run summary to this path"
    )]
    summary_json: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(
        long,
        default_value_t = 2,
        value_parser = clap::value_parser!(u32).range(1..=MAX_SCALE as i64),
        help = "Dataset scale (1-10)"
    )]
    scale: u32,
    #[arg(
        long,
        value_name = "PATH",
        help = "Output path (default: data_<scale>.csv.gz)"
    )]
    output: Option<PathBuf>,
    #[arg(long, help = "Optional deterministic seed")]
    seed: Option<u64>,
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let value: usize = raw
        .parse()
        .map_err(|_| format!("invalid value '{}': expected a positive integer", raw))?;
    if value == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Command::Generate(args)) => generate(args).await,
        Some(Command::Run(args)) => run(args).await,
        None => run(cli.run).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Run failed");
            let presentation = e.to_presentation();
            eprintln!("{}: {}", presentation.title, presentation.message);
            if let Some(action) = presentation.action {
                eprintln!("  {}", action);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> Result<(), PipelineError> {
    let config = PipelineConfig::new(args.gzip_filename, args.reportfile)
        .line_limit(args.line_limit)
        .work_dir(args.work_dir)
        .workers(args.workers.unwrap_or_else(default_workers))
        .keep_intermediates(args.keep_intermediates);

    println!("Processing file: {}", config.input.display());
    let summary = run_pipeline(&config).await?;

    if let Some(path) = args.summary_json {
        summary.write_json(&path)?;
    }

    println!(
        "Wrote {} pairs ({} basket occurrences) from {} chunks to {}",
        summary.distinct_pairs,
        summary.pair_occurrences,
        summary.chunks,
        summary.report_path.display()
    );
    println!("Run time: {:.3} seconds.", summary.timings.total_secs);
    Ok(())
}

async fn generate(args: GenerateArgs) -> Result<(), PipelineError> {
    let shape = DatasetShape::for_scale(args.scale)?;
    let output = args.output.unwrap_or_else(|| default_output(args.scale));

    println!("Generating dataset with scale: {}", args.scale);
    let summary = generate_dataset(&output, shape, args.seed).await?;
    println!(
        "Generated {} rows in {} baskets at {}",
        summary.rows,
        summary.shape.baskets,
        summary.path.display()
    );
    Ok(())
}
