use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use rusty_sheet_pipeline::{logging, Config, Endpoint, RequestCoordinator, Upload, UploadRequest, XlsxCodec};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sheet-pipeline", about = "Split and merge Excel workbooks into a ZIP archive")]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for per-request workspaces
    #[arg(long, global = true, env = "SHEET_PIPELINE_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Directory receiving the `{token}.zip` archives
    #[arg(long, global = true, env = "SHEET_PIPELINE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform one workbook: fun1 (by sheet), fun2 (by type, files), fun3 (by type, sheets)
    Upload(RequestArgs),
    /// Merge several workbooks: fun4 (one sheet each), fun5 (single sheet)
    Upload2(RequestArgs),
}

#[derive(Args)]
struct RequestArgs {
    /// Action token
    #[arg(short, long)]
    action: String,

    /// Workbook to upload; repeat for several files
    #[arg(short, long = "file", required = true)]
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log)?;

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(work_dir) = cli.work_dir {
        config.work_dir = work_dir;
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    config.prepare().context("Failed to prepare pipeline directories")?;

    let (endpoint, args) = match cli.command {
        Commands::Upload(args) => (Endpoint::Upload, args),
        Commands::Upload2(args) => (Endpoint::Upload2, args),
    };
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(Upload::new(path.to_string_lossy(), bytes));
    }

    let coordinator = RequestCoordinator::new(Box::new(XlsxCodec), config);
    let delivery = coordinator
        .handle(UploadRequest {
            endpoint,
            action: Some(args.action),
            files,
        })
        .map_err(|error| anyhow::anyhow!("{}: {error}", error.kind()))
        .with_context(|| format!("Request to {endpoint} failed"))?;

    println!("{}", delivery.path.display());
    Ok(())
}
