use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use rusty_reservoir::data::mat::{encode_mat, MatWriteOptions};
use rusty_reservoir::data::octave::to_octave_text;
use rusty_reservoir::export;
use rusty_reservoir::{
    load_with_fallback, AccessorConfig, DataLayout, DatasetAccessor, DatasetCategory, FileLoader,
};

#[derive(Debug, Parser)]
#[command(name = "rusty-reservoir", version, about = "Inspect and convert MRST simulation exports")]
struct Cli {
    /// Root of the export directory tree.
    #[arg(long, env = "RESERVOIR_DATA_ROOT", default_value = "data", global = true)]
    data_root: PathBuf,

    /// JSON file overriding candidate paths per dataset category.
    #[arg(long, global = true)]
    layout: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print one line per variable of a dataset category.
    Inspect { category: DatasetCategory },

    /// Show which file each category resolves to.
    Paths,

    /// Write a dataset category as JSON, CSV or Parquet.
    Export {
        category: DatasetCategory,
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Output file; JSON goes to stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Re-encode a single MAT-file or Octave text file.
    Convert {
        input: PathBuf,
        output: PathBuf,
        /// Write MAT v5 instead of Octave text.
        #[arg(long)]
        binary: bool,
        /// Compress MAT v5 variables (implies --binary).
        #[arg(long)]
        compress: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
    Parquet,
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let layout = match &cli.layout {
        Some(path) => DataLayout::from_json_file(path)?,
        None => DataLayout::default(),
    };
    let config = AccessorConfig::new(&cli.data_root).with_layout(layout);

    match cli.command {
        Command::Inspect { category } => {
            let mut accessor = DatasetAccessor::new(config);
            let path = accessor.resolve(category)?;
            let table = accessor.get(category)?;
            println!("{category}: {}", path.display());
            for line in export::summarize(&table) {
                println!("  {line}");
            }
        }
        Command::Paths => {
            let accessor = DatasetAccessor::new(config);
            println!("data root: {}", accessor.config().data_root.display());
            for category in DatasetCategory::ALL {
                match accessor.resolve(category) {
                    Ok(path) => println!("{category:<15} {}", path.display()),
                    Err(err) => println!("{category:<15} missing ({err})"),
                }
            }
        }
        Command::Export {
            category,
            format,
            output,
        } => {
            let mut accessor = DatasetAccessor::new(config);
            let table = accessor.get(category)?;
            match (format, output) {
                (ExportFormat::Json, None) => println!("{}", export::to_json(&table)?),
                (ExportFormat::Json, Some(path)) => {
                    fs::write(&path, export::to_json(&table)?)
                        .with_context(|| format!("writing {}", path.display()))?;
                }
                (ExportFormat::Csv, Some(path)) => export::write_csv(&table, &path)?,
                (ExportFormat::Parquet, Some(path)) => export::write_parquet(&table, &path)?,
                (_, None) => anyhow::bail!("--output is required for CSV and Parquet export"),
            }
        }
        Command::Convert {
            input,
            output,
            binary,
            compress,
        } => convert(&input, &output, binary || compress, compress)?,
    }
    Ok(())
}

fn convert(input: &Path, output: &Path, binary: bool, compress: bool) -> Result<()> {
    let table = load_with_fallback(&FileLoader, input)?;
    let bytes = if binary {
        encode_mat(&table, MatWriteOptions { compress })?
    } else {
        to_octave_text(&table)?.into_bytes()
    };
    fs::write(output, bytes).with_context(|| format!("writing {}", output.display()))?;
    log::info!(
        "converted {} variables from {} to {}",
        table.len(),
        input.display(),
        output.display()
    );
    Ok(())
}
