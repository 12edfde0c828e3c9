//! flatxml CLI - flatten XML documents into CSV using a mapping configuration
//!
//! # Commands
//!
//! ```bash
//! flatxml convert -c mapping.xml -o out/ data/        # Write one CSV per output
//! flatxml preview -c mapping.xml data/order-1.xml     # Print the rows of one document
//! flatxml check -c mapping.xml                        # Show outputs and column layout
//! ```

use clap::{Parser, Subcommand};
use flatxml::{
    convert_files, describe_outputs, extract_document, load_files, ConvertOptions, EvaluationOptions,
    OutputPreview,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "flatxml")]
#[command(about = "Flatten XML documents into CSV files using XPath mappings", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert input documents into one CSV file per output
    Convert {
        /// Mapping configuration file(s)
        #[arg(short, long = "config", required = true)]
        configs: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Append to existing CSV files
        #[arg(long)]
        append: bool,

        /// Trim whitespace around extracted values
        #[arg(long)]
        trim: bool,

        /// Skip documents that fail instead of stopping
        #[arg(long)]
        keep_going: bool,

        /// Input XML files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Print the rows one document produces, without writing files
    Preview {
        /// Mapping configuration file(s)
        #[arg(short, long = "config", required = true)]
        configs: Vec<PathBuf>,

        /// Input XML file
        input: PathBuf,

        /// Only this output
        #[arg(long)]
        output: Option<String>,

        /// Trim whitespace around extracted values
        #[arg(long)]
        trim: bool,

        /// Print JSON instead of CSV
        #[arg(long)]
        json: bool,
    },

    /// Load configuration(s) and describe every output
    Check {
        /// Mapping configuration file(s)
        #[arg(short, long = "config", required = true)]
        configs: Vec<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "flatxml=warn",
        1 => "flatxml=info",
        2 => "flatxml=debug",
        _ => "flatxml=trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Convert {
            configs,
            output,
            append,
            trim,
            keep_going,
            inputs,
        } => cmd_convert(
            &configs,
            &inputs,
            ConvertOptions {
                output_dir: output,
                append,
                trim_whitespace: trim,
                continue_on_error: keep_going,
            },
        ),

        Commands::Preview {
            configs,
            input,
            output,
            trim,
            json,
        } => cmd_preview(&configs, &input, output.as_deref(), trim, json),

        Commands::Check { configs } => cmd_check(&configs),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_convert(
    configs: &[PathBuf],
    inputs: &[PathBuf],
    options: ConvertOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_files(configs)?;
    eprintln!("Loaded {} output(s) from {} configuration file(s)", config.outputs().len(), configs.len());

    let summary = convert_files(&mut config, inputs, &options)?;

    eprintln!(
        "Documents: {} read, {} filtered, {} failed",
        summary.documents_read, summary.documents_filtered, summary.documents_failed
    );
    for output in &summary.outputs {
        eprintln!(
            "   {} -> {} ({} rows, {})",
            output.name,
            output.path.display(),
            output.rows,
            output.strategy
        );
    }
    Ok(())
}

fn cmd_preview(
    configs: &[PathBuf],
    input: &Path,
    output: Option<&str>,
    trim: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_files(configs)?;
    let options = EvaluationOptions { trim_whitespace: trim };
    let previews = extract_document(&mut config, input, output, &options)?;

    if previews.is_empty() {
        eprintln!("{} was excluded by the input filters", input.display());
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&previews)?);
        return Ok(());
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for (i, preview) in previews.iter().enumerate() {
        if previews.len() > 1 {
            if i > 0 {
                writeln!(handle)?;
            }
            writeln!(handle, "# {}", preview.name)?;
        }
        write_preview(&mut handle, preview)?;
    }
    Ok(())
}

fn write_preview<W: Write>(out: W, preview: &OutputPreview) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .flexible(true)
        .from_writer(out);
    if !preview.columns.is_empty() {
        writer.write_record(&preview.columns)?;
    }
    for row in &preview.rows {
        writer.write_record(row.iter().map(|f| f.as_deref().unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(())
}

fn cmd_check(configs: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_files(configs)?;
    let described = describe_outputs(&config);
    eprintln!("Configuration OK: {} output(s)", described.len());
    println!("{}", serde_json::to_string_pretty(&described)?);
    Ok(())
}
