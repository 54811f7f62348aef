//! Directory-level stages. Each file or device is processed on its own, in
//! parallel; a failure is recorded against that input and the rest carry on.

use std::path::{Path, PathBuf};

use log::{error, info, warn};
use rayon::prelude::*;

use crate::cleaner::{consolidate_union, FeatureCleaner};
use crate::config::PrepConfig;
use crate::encoder::DatasetEncoder;
use crate::error::{PrepError, Result};
use crate::io::{self, ChunkedReader};
use crate::labeller::{DeviceContext, DeviceId, Labeller};
use crate::record::{FeatureRow, TrafficRecord};
use crate::split::DatasetSplitter;
use crate::table::{Schema, Table};
use crate::transform::{FeatureTransformer, TransformReport};

/// Outcome of one stage over many inputs.
#[derive(Debug, Default)]
pub struct StageSummary {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, PrepError)>,
}

impl StageSummary {
    pub(crate) fn record(&mut self, input: PathBuf, outcome: Result<Vec<PathBuf>>) {
        match outcome {
            Ok(outputs) => self.written.extend(outputs),
            Err(e) if e.is_skippable() => {
                warn!("Skipping {}: {}", input.display(), e);
                self.skipped.push(input);
            }
            Err(e) => {
                error!("Failed to process {}: {}", input.display(), e);
                self.failed.push((input, e));
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

fn thread_pool(config: &PrepConfig) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.thread_count())
        .build()
        .map_err(|e| PrepError::Config(format!("failed to build thread pool: {}", e)))
}

/// Labels one extracted file chunk by chunk into `output`. Returns the
/// number of rows kept; `output` only appears once every chunk is written.
pub fn label_file(input: &Path, output: &Path, labeller: &Labeller, config: &PrepConfig) -> Result<usize> {
    let ctx = labeller.resolve(&io::file_name(input))?;
    let partial = io::partial_path(output);
    let written = write_labelled(input, &partial, labeller, &ctx, config)
        .and_then(|kept| Ok(std::fs::rename(&partial, output).map(|()| kept)?));
    match written {
        Ok(kept) => {
            info!("Labeled data saved to {} ({} rows, device {})", output.display(), kept, ctx.device);
            Ok(kept)
        }
        Err(e) => {
            io::discard_outputs(&[partial]);
            Err(e)
        }
    }
}

fn write_labelled(input: &Path, output: &Path, labeller: &Labeller, ctx: &DeviceContext<'_>, config: &PrepConfig) -> Result<usize> {
    let mut writer = io::create_writer(output, config.labelled_delimiter)?;
    let mut kept = 0usize;
    for chunk in ChunkedReader::<TrafficRecord>::open(input, config.extracted_delimiter, config.chunk_size)? {
        let labelled = labeller.label_records(ctx, chunk?);
        kept += labelled.len();
        io::write_rows(&mut writer, &labelled)?;
    }
    writer.flush()?;
    Ok(kept)
}

pub fn label_directory(input_dir: &Path, output_dir: &Path, labeller: &Labeller, config: &PrepConfig) -> Result<StageSummary> {
    let files = io::csv_files(input_dir)?;
    info!("Labelling {} files from {} with {} rules", files.len(), input_dir.display(), labeller.rule_count());

    let pool = thread_pool(config)?;
    let outcomes: Vec<(PathBuf, Result<Vec<PathBuf>>)> = pool.install(|| {
        files
            .par_iter()
            .map(|input| {
                let output = output_dir.join(io::file_name(input));
                let outcome = label_file(input, &output, labeller, config).map(|_| vec![output]);
                (input.clone(), outcome)
            })
            .collect()
    });

    let mut summary = StageSummary::default();
    for (input, outcome) in outcomes {
        summary.record(input, outcome);
    }
    Ok(summary)
}

fn read_device_table(files: &[PathBuf], schema: &Schema, config: &PrepConfig) -> Result<Table> {
    let delimiter = io::delimiter_byte(config.extracted_delimiter)?;
    let mut table = Table::default();
    for path in files {
        let file = std::fs::File::open(path)?;
        table.append(Table::read_csv(file, delimiter, schema)?)?;
    }
    Ok(table)
}

/// Cleans every device's raw features, takes the union of the surviving
/// columns and writes each device projected onto that union.
pub fn clean_devices(benign_dir: &Path, malicious_root: &Path, output_dir: &Path, config: &PrepConfig) -> Result<StageSummary> {
    let devices = io::device_inputs(benign_dir, malicious_root)?;
    let schema = Schema::extracted_fields();
    let cleaner = FeatureCleaner::new(config.cleaner.clone());
    let pool = thread_pool(config)?;

    let cleaned: Vec<(DeviceId, PathBuf, Result<Table>)> = pool.install(|| {
        devices
            .par_iter()
            .filter(|(_, files)| !files.is_empty())
            .map(|(device, files)| {
                let table = read_device_table(files, &schema, config).map(|t| cleaner.clean_features(t));
                if table.is_ok() {
                    info!("IoT Device: {} Done!", device);
                }
                (device.clone(), files[0].clone(), table)
            })
            .collect()
    });

    let mut summary = StageSummary::default();
    let mut tables = Vec::new();
    for (device, input, table) in cleaned {
        match table {
            Ok(table) => tables.push((device, table)),
            Err(e) => summary.record(input, Err(e)),
        }
    }

    let feature_sets: Vec<Vec<String>> = tables.iter().map(|(_, t)| t.column_names()).collect();
    let global_features = consolidate_union(&feature_sets);
    info!("Consolidated {} global features across {} devices", global_features.len(), tables.len());

    let delimiter = io::delimiter_byte(config.merged_delimiter)?;
    for (device, table) in tables {
        let output = output_dir.join(format!("{}_cleaned.csv", device));
        let outcome = cleaner
            .apply_global_features(&table, &global_features, &schema)
            .and_then(|projected| {
                std::fs::create_dir_all(output_dir)?;
                projected.write_csv(std::fs::File::create(&output)?, delimiter)?;
                Ok(vec![output.clone()])
            });
        summary.record(output, outcome);
    }
    Ok(summary)
}

/// Streams a merged device file through the transformer.
pub fn transform_file(path: &Path, transformer: &FeatureTransformer, config: &PrepConfig) -> Result<(Vec<FeatureRow>, TransformReport)> {
    let mut rows = Vec::new();
    let mut report = TransformReport::default();
    for chunk in ChunkedReader::<TrafficRecord>::open(path, config.merged_delimiter, config.chunk_size)? {
        let (chunk_rows, chunk_report) = transformer.transform(&chunk?)?;
        rows.extend(chunk_rows);
        report.merge(&chunk_report);
    }
    Ok((rows, report))
}

/// Every file `preprocess_device` writes for `device`.
fn device_artifacts(output_dir: &Path, device: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = SPLIT_NAMES
        .iter()
        .flat_map(|split| io::split_artifacts(output_dir, device, split))
        .collect();
    paths.push(output_dir.join(format!("{}_encoder.json", device)));
    paths
}

const SPLIT_NAMES: [&str; 3] = ["train", "val", "test"];

/// Transform, split, fit on train, encode and write the nine artifacts plus
/// the encoder state for one device. On failure none of them are left.
pub fn preprocess_device(input: &Path, output_dir: &Path, config: &PrepConfig) -> Result<Vec<PathBuf>> {
    let device = io::file_stem(input);
    info!("Processing {}", input.display());
    let outcome = encode_device(input, &device, output_dir, config);
    if outcome.is_err() {
        io::discard_outputs(&device_artifacts(output_dir, &device));
    }
    outcome
}

fn encode_device(input: &Path, device: &str, output_dir: &Path, config: &PrepConfig) -> Result<Vec<PathBuf>> {
    let transformer = FeatureTransformer::new(
        config.port_hierarchy.clone(),
        config.taxonomy.clone(),
        config.unknown_protocol,
    );
    let (rows, report) = transform_file(input, &transformer, config)?;
    info!(
        "{}: {} rows in, {} kept ({} unlabelled, {} unsupported protocol)",
        device, report.input_rows, report.output_rows, report.unlabelled, report.unknown_protocol
    );

    let split = DatasetSplitter::new(config.split.clone()).train_valid_test_split(rows)?;
    let encoder = DatasetEncoder::new(config.vocabulary(), config.one_hot_drop_first);
    let fitted = encoder.fit(&split.train)?;

    let mut written = Vec::new();
    for (name, rows) in SPLIT_NAMES.iter().zip([&split.train, &split.validation, &split.test]) {
        let encoded = fitted.transform(rows)?;
        written.extend(io::write_encoded_split(output_dir, device, name, &encoded, &fitted.feature_names)?);
    }
    let state = output_dir.join(format!("{}_encoder.json", device));
    fitted.save(&state)?;
    written.push(state);
    Ok(written)
}

pub fn preprocess_directory(input_dir: &Path, output_dir: &Path, config: &PrepConfig) -> Result<StageSummary> {
    let files = io::csv_files(input_dir)?;
    std::fs::create_dir_all(output_dir)?;
    let pool = thread_pool(config)?;

    let outcomes: Vec<(PathBuf, Result<Vec<PathBuf>>)> = pool.install(|| {
        files
            .par_iter()
            .map(|input| (input.clone(), preprocess_device(input, output_dir, config)))
            .collect()
    });

    let mut summary = StageSummary::default();
    for (input, outcome) in outcomes {
        summary.record(input, outcome);
    }
    info!(
        "Preprocessed {} devices, {} failed",
        files.len() - summary.failed.len(),
        summary.failed.len()
    );
    Ok(summary)
}
