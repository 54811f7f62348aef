//! Delimited file plumbing: chunked reads, labelled/merged outputs and the
//! encoded artifacts.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::encoder::EncodedSplit;
use crate::error::{PrepError, Result};
use crate::labeller::DeviceId;
use crate::record::{TrafficRecord, LABEL, LABEL_CATEGORY};

pub type CsvWriter = csv::Writer<BufWriter<File>>;

pub fn delimiter_byte(delimiter: char) -> Result<u8> {
    u8::try_from(delimiter)
        .map_err(|_| PrepError::Config(format!("delimiter '{}' is not a single byte", delimiter)))
}

/// `.csv` files directly inside `dir`, sorted by name.
pub fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "csv"))
        .collect();
    files.sort();
    Ok(files)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// File name without the `.csv` extension.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Streams a delimited file as batches of at most `chunk_size` rows.
pub struct ChunkedReader<T> {
    records: csv::DeserializeRecordsIntoIter<File, T>,
    chunk_size: usize,
}

impl<T: DeserializeOwned> ChunkedReader<T> {
    pub fn open(path: &Path, delimiter: char, chunk_size: usize) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_byte(delimiter)?)
            .flexible(true)
            .from_path(path)?;
        Ok(Self {
            records: reader.into_deserialize(),
            chunk_size: chunk_size.max(1),
        })
    }
}

impl<T: DeserializeOwned> Iterator for ChunkedReader<T> {
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = Vec::with_capacity(self.chunk_size);
        for record in self.records.by_ref() {
            match record {
                Ok(row) => chunk.push(row),
                Err(e) => return Some(Err(e.into())),
            }
            if chunk.len() == self.chunk_size {
                break;
            }
        }
        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

/// Sibling path a stage writes to until its output is complete.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Removes whatever a failed stage left behind.
pub fn discard_outputs(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => warn!("Removed incomplete output {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove incomplete output {}: {}", path.display(), e),
        }
    }
}

pub fn create_writer(path: &Path, delimiter: char) -> Result<CsvWriter> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(csv::WriterBuilder::new()
        .delimiter(delimiter_byte(delimiter)?)
        .from_writer(BufWriter::new(File::create(path)?)))
}

pub fn write_rows<T: Serialize>(writer: &mut CsvWriter, rows: &[T]) -> Result<()> {
    for row in rows {
        writer.serialize(row)?;
    }
    Ok(())
}

pub fn write_feature_matrix(path: &Path, feature_names: &[String], features: &Array2<f64>) -> Result<()> {
    let mut writer = create_writer(path, ',')?;
    writer.write_record(feature_names)?;
    for row in features.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_label_column(path: &Path, header: &str, labels: &Array1<usize>) -> Result<()> {
    let mut writer = create_writer(path, ',')?;
    writer.write_record([header])?;
    for label in labels.iter() {
        writer.write_record([label.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Feature, label and grouped-label paths of one split.
pub fn split_artifacts(out_dir: &Path, device: &str, split: &str) -> [PathBuf; 3] {
    [
        out_dir.join(format!("{}_{}_features.csv", device, split)),
        out_dir.join(format!("{}_{}_labels.csv", device, split)),
        out_dir.join(format!("{}_{}_labels_grouped.csv", device, split)),
    ]
}

/// Writes `{device}_{split}_features.csv`, `{device}_{split}_labels.csv`
/// and `{device}_{split}_labels_grouped.csv`.
pub fn write_encoded_split(
    out_dir: &Path,
    device: &str,
    split: &str,
    encoded: &EncodedSplit,
    feature_names: &[String],
) -> Result<Vec<PathBuf>> {
    let [features, labels, grouped] = split_artifacts(out_dir, device, split);
    write_feature_matrix(&features, feature_names, &encoded.features)?;
    write_label_column(&labels, LABEL, &encoded.labels)?;
    write_label_column(&grouped, LABEL_CATEGORY, &encoded.categories)?;
    debug!("wrote {} {} rows for {}", encoded.n_rows(), split, device);
    Ok(vec![features, labels, grouped])
}

/// Delimited options for the merge step.
#[derive(Debug, Clone, Copy)]
pub struct MergeFormat {
    pub input_delimiter: char,
    pub output_delimiter: char,
    pub chunk_size: usize,
}

/// Groups the files of every device instance found in `benign_dir`: its
/// benign file(s) first, then its files from each attack directory under
/// `malicious_root`, in name order.
pub fn device_inputs(benign_dir: &Path, malicious_root: &Path) -> Result<Vec<(DeviceId, Vec<PathBuf>)>> {
    let benign = csv_files(benign_dir)?;
    let mut attack_files = Vec::new();
    if malicious_root.is_dir() {
        let mut event_dirs: Vec<PathBuf> = fs::read_dir(malicious_root)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        event_dirs.sort();
        for dir in event_dirs {
            attack_files.extend(csv_files(&dir)?);
        }
    } else {
        warn!("malicious directory {} not found, using benign traffic only", malicious_root.display());
    }

    let mut devices: Vec<DeviceId> = benign
        .iter()
        .filter_map(|p| DeviceId::parse(&file_name(p)).ok())
        .collect();
    devices.sort_by_key(|d| d.to_string());
    devices.dedup();

    Ok(devices
        .into_iter()
        .map(|device| {
            let files = benign
                .iter()
                .chain(attack_files.iter())
                .filter(|p| DeviceId::parse(&file_name(p)).map_or(false, |d| d == device))
                .cloned()
                .collect();
            (device, files)
        })
        .collect())
}

/// Concatenates each device instance's labelled files into
/// `out_dir/{device}.csv`.
pub fn merge_device_files(
    benign_dir: &Path,
    malicious_root: &Path,
    out_dir: &Path,
    format: MergeFormat,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (device, inputs) in device_inputs(benign_dir, malicious_root)? {
        let output = out_dir.join(format!("{}.csv", device));
        let mut writer = create_writer(&output, format.output_delimiter)?;
        let mut rows = 0usize;
        for input in &inputs {
            for chunk in ChunkedReader::<TrafficRecord>::open(input, format.input_delimiter, format.chunk_size)? {
                let chunk = chunk?;
                rows += chunk.len();
                write_rows(&mut writer, &chunk)?;
            }
        }
        writer.flush()?;
        info!("IoT device {}: merged {} files ({} rows)", device, inputs.len(), rows);
        written.push(output);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_chunks_cover_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plug-1.csv");
        let mut text = String::from("ip.src\tip.dst\tlabel\n");
        for i in 0..7 {
            text.push_str(&format!("10.0.0.{}\t8.8.8.8\tBenign\n", i));
        }
        write(&path, &text);
        let sizes: Vec<usize> = ChunkedReader::<TrafficRecord>::open(&path, '\t', 3)
            .unwrap()
            .map(|c| c.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_merge_per_device_instance() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let header = "ip.src\tip.dst\tlabel\n";
        write(&root.join("benign/plug-1.csv"), &format!("{}10.0.0.5\t8.8.8.8\tBenign\n", header));
        write(&root.join("benign/plug-10.csv"), &format!("{}10.0.0.6\t8.8.8.8\tBenign\n", header));
        write(
            &root.join("malicious/mirai-dos/plug-1.csv"),
            &format!("{}10.0.0.5\t1.2.3.4\tMirai UDP Flooding\n", header),
        );
        let format = MergeFormat {
            input_delimiter: '\t',
            output_delimiter: ',',
            chunk_size: 10,
        };
        let written = merge_device_files(&root.join("benign"), &root.join("malicious"), &root.join("ready"), format)
            .unwrap();
        assert_eq!(written.len(), 2);

        let merged: Vec<TrafficRecord> = ChunkedReader::open(&root.join("ready/plug-1.csv"), ',', 100)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].label, "Mirai UDP Flooding");
        let other: Vec<TrafficRecord> = ChunkedReader::open(&root.join("ready/plug-10.csv"), ',', 100)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_label_column_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        write_label_column(&path, LABEL, &Array1::from(vec![3usize, 0])).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "label\n3\n0\n");
    }
}
