//! Invocation of the external capture extractor (tshark).

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::info;

use crate::config::ExtractorConfig;
use crate::error::{PrepError, Result};
use crate::io::{discard_outputs, file_name, partial_path};
use crate::labeller::{resolve_device, DeviceId};
use crate::metadata::NormalMetadata;
use crate::pipeline::StageSummary;

/// One extractor run over a single capture file.
#[derive(Debug, Clone)]
pub struct TsharkCommand {
    pub tshark_path: PathBuf,
    pub pcap: PathBuf,
    pub fields: Vec<String>,
    pub display_filter: Option<String>,
}

impl TsharkCommand {
    pub fn new(config: &ExtractorConfig, pcap: &Path) -> Self {
        Self {
            tshark_path: config.tshark_path.clone(),
            pcap: pcap.to_path_buf(),
            fields: config.fields.clone(),
            display_filter: None,
        }
    }

    pub fn with_device_filter(mut self, device_ip: &str) -> Self {
        self.display_filter = Some(format!("ip.addr == {}", device_ip));
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-n".to_string(),
            "-r".to_string(),
            self.pcap.to_string_lossy().into_owned(),
        ];
        if let Some(filter) = &self.display_filter {
            args.push("-Y".to_string());
            args.push(filter.clone());
        }
        args.push("-T".to_string());
        args.push("fields".to_string());
        for field in &self.fields {
            args.push("-e".to_string());
            args.push(field.clone());
        }
        for option in ["header=y", "separator=\t", "occurrence=f"] {
            args.push("-E".to_string());
            args.push(option.to_string());
        }
        args
    }

    /// Runs the extractor with its stdout streamed straight into `output`.
    /// Nothing is left at `output` when the run fails.
    pub fn run(&self, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(output);
        let outcome = self.run_into(&partial).and_then(|()| Ok(fs::rename(&partial, output)?));
        match &outcome {
            Ok(()) => info!("tshark parsing complete. File saved as: {}", output.display()),
            Err(_) => discard_outputs(&[partial]),
        }
        outcome
    }

    fn run_into(&self, output: &Path) -> Result<()> {
        let out = File::create(output)?;
        let result = Command::new(&self.tshark_path)
            .args(self.args())
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .output()?;

        if result.status.success() {
            Ok(())
        } else {
            Err(PrepError::ExtractorFailed {
                command: self.tshark_path.display().to_string(),
                exit_code: result.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            })
        }
    }
}

fn pcap_files(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?.filter_map(|e| e.ok().map(|e| e.path())).collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            pcap_files(&path, found)?;
        } else if path.extension().map_or(false, |ext| ext == "pcap") {
            found.push(path);
        }
    }
    Ok(())
}

fn extract_capture(pcap: &Path, output: &Path, config: &ExtractorConfig, normal: &NormalMetadata) -> Result<Vec<PathBuf>> {
    let mut command = TsharkCommand::new(config, pcap);
    if config.filter_by_device {
        let device = DeviceId::parse(&file_name(pcap))?;
        let ctx = resolve_device(normal, device)?;
        command = command.with_device_filter(ctx.device_ip);
    }
    command.run(output)?;
    Ok(vec![output.to_path_buf()])
}

/// Extracts every `.pcap` under `input_dir`, mirroring its subdirectories
/// in `output_dir`. A capture that cannot be extracted is recorded and the
/// rest carry on.
pub fn extract_directory(
    input_dir: &Path,
    output_dir: &Path,
    config: &ExtractorConfig,
    normal: &NormalMetadata,
) -> Result<StageSummary> {
    let mut captures = Vec::new();
    pcap_files(input_dir, &mut captures)?;
    info!("Found {} capture files under {}", captures.len(), input_dir.display());

    let mut summary = StageSummary::default();
    for pcap in captures {
        let relative = pcap.strip_prefix(input_dir).unwrap_or(&pcap);
        let output = output_dir.join(relative).with_extension("csv");
        let outcome = extract_capture(&pcap, &output, config, normal);
        summary.record(pcap, outcome);
    }
    Ok(summary)
}
