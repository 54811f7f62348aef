use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use iot_dataset_prep::config::PrepConfig;
use iot_dataset_prep::io::{merge_device_files, MergeFormat};
use iot_dataset_prep::logger::setup_logger;
use iot_dataset_prep::metadata::{load_malicious_rules, load_normal_metadata};
use iot_dataset_prep::pipeline::{self, StageSummary};
use iot_dataset_prep::{extract, Labeller};

#[derive(Parser)]
#[command(name = "iot-prep")]
#[command(author, version, about = "Label and encode IoT traffic captures for federated training")]
struct Cli {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tshark over every capture under a directory
    Extract {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        normal_metadata: PathBuf,
    },

    /// Label extracted packet files
    Label {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        normal_metadata: PathBuf,
        /// Attack rules; omit for benign captures
        #[arg(long)]
        malicious_metadata: Option<PathBuf>,
    },

    /// Merge each device's benign and malicious labelled files
    Merge {
        benign: PathBuf,
        malicious: PathBuf,
        output: PathBuf,
    },

    /// Clean per-device features and consolidate a shared feature set
    Clean {
        benign: PathBuf,
        malicious: PathBuf,
        output: PathBuf,
    },

    /// Transform, split and encode merged device files
    Preprocess { input: PathBuf, output: PathBuf },
}

fn print_summary(stage: &str, summary: &StageSummary) {
    println!(
        "{}: {} written, {} skipped, {} failed",
        stage,
        summary.written.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    for (path, err) in &summary.failed {
        println!("  {}: {}", path.display(), err);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logger(cli.log_level, cli.log_file.as_deref())?;

    let config = match &cli.config {
        Some(path) => PrepConfig::load(path)?,
        None => PrepConfig::default(),
    };

    let summary = match cli.command {
        Commands::Extract {
            input,
            output,
            normal_metadata,
        } => {
            let normal = load_normal_metadata(&normal_metadata);
            let summary = extract::extract_directory(&input, &output, &config.extractor, &normal)?;
            print_summary("extract", &summary);
            summary
        }
        Commands::Label {
            input,
            output,
            normal_metadata,
            malicious_metadata,
        } => {
            let normal = load_normal_metadata(&normal_metadata);
            let rules = malicious_metadata
                .as_deref()
                .map(load_malicious_rules)
                .unwrap_or_default();
            let labeller = Labeller::new(normal, rules, config.strict_ip_patterns)?;
            let summary = pipeline::label_directory(&input, &output, &labeller, &config)?;
            print_summary("label", &summary);
            summary
        }
        Commands::Merge {
            benign,
            malicious,
            output,
        } => {
            let format = MergeFormat {
                input_delimiter: config.labelled_delimiter,
                output_delimiter: config.merged_delimiter,
                chunk_size: config.chunk_size,
            };
            let written = merge_device_files(&benign, &malicious, &output, format)?;
            println!("Merged {} devices into {}", written.len(), output.display());
            return Ok(());
        }
        Commands::Clean {
            benign,
            malicious,
            output,
        } => {
            let summary = pipeline::clean_devices(&benign, &malicious, &output, &config)?;
            print_summary("clean", &summary);
            summary
        }
        Commands::Preprocess { input, output } => {
            let summary = pipeline::preprocess_directory(&input, &output, &config)?;
            print_summary("preprocess", &summary);
            summary
        }
    };

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
