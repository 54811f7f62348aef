use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};
use crate::ports::PortHierarchy;
use crate::vocab::{GlobalVocabulary, LabelTaxonomy};

/// What to do with rows whose protocol stack is neither TCP, UDP nor ICMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownProtocolPolicy {
    /// Drop the row and count it.
    Drop,
    /// Keep the row as protocol "Other" with no ports.
    Categorize,
    /// Fail the whole batch.
    Reject,
}

impl Default for UnknownProtocolPolicy {
    fn default() -> Self {
        UnknownProtocolPolicy::Drop
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub training_size: f64,
    pub validation_size: f64,
    pub testing_size: f64,
    pub seed: u64,
    /// Stratify the validation/test split as well as the train/holdout one.
    pub stratify_holdout: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            training_size: 0.6,
            validation_size: 0.2,
            testing_size: 0.2,
            seed: 42,
            stratify_holdout: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    pub variance_threshold: f64,
    pub correlation_threshold: f64,
    pub missing_threshold: f64,
    pub num_replacement: f64,
    pub cat_replacement: String,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            variance_threshold: 0.01,
            correlation_threshold: 0.9,
            missing_threshold: 1.0,
            num_replacement: -1.0,
            cat_replacement: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub tshark_path: PathBuf,
    pub fields: Vec<String>,
    /// Restrict extraction to traffic touching the device's own address.
    pub filter_by_device: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            tshark_path: PathBuf::from("tshark"),
            fields: [
                "frame.time",
                "frame.len",
                "frame.protocols",
                "ip.src",
                "ip.dst",
                "ip.proto",
                "ip.flags",
                "ip.ttl",
                "ip.checksum",
                "tcp.srcport",
                "tcp.dstport",
                "tcp.flags",
                "tcp.window_size_value",
                "tcp.window_size_scalefactor",
                "tcp.checksum",
                "tcp.options",
                "tcp.pdu.size",
                "udp.srcport",
                "udp.dstport",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            filter_by_device: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    /// Rows per chunk when streaming delimited files.
    pub chunk_size: usize,
    /// Worker threads for per-device parallelism; 0 means one per CPU.
    pub threads: usize,
    pub extracted_delimiter: char,
    pub labelled_delimiter: char,
    pub merged_delimiter: char,
    pub strict_ip_patterns: bool,
    pub unknown_protocol: UnknownProtocolPolicy,
    /// Drop the first category of every one-hot block.
    pub one_hot_drop_first: bool,
    pub split: SplitConfig,
    pub cleaner: CleanerConfig,
    pub extractor: ExtractorConfig,
    pub port_hierarchy: PortHierarchy,
    pub taxonomy: LabelTaxonomy,
    /// Explicit vocabularies; derived from taxonomy and ports when absent.
    pub vocabulary: Option<GlobalVocabulary>,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            threads: 0,
            extracted_delimiter: '\t',
            labelled_delimiter: '\t',
            merged_delimiter: ',',
            strict_ip_patterns: false,
            unknown_protocol: UnknownProtocolPolicy::default(),
            one_hot_drop_first: true,
            split: SplitConfig::default(),
            cleaner: CleanerConfig::default(),
            extractor: ExtractorConfig::default(),
            port_hierarchy: PortHierarchy::default(),
            taxonomy: LabelTaxonomy::default(),
            vocabulary: None,
        }
    }
}

impl PrepConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: PrepConfig = serde_json::from_str(&text)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.split;
        for (name, value) in [
            ("training_size", s.training_size),
            ("validation_size", s.validation_size),
            ("testing_size", s.testing_size),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PrepError::Config(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        let total = s.training_size + s.validation_size + s.testing_size;
        if (total - 1.0).abs() > 1e-6 {
            return Err(PrepError::Config(format!("split sizes must sum to 1, got {}", total)));
        }
        if self.chunk_size == 0 {
            return Err(PrepError::Config("chunk_size must be positive".to_string()));
        }
        for (name, delim) in [
            ("extracted_delimiter", self.extracted_delimiter),
            ("labelled_delimiter", self.labelled_delimiter),
            ("merged_delimiter", self.merged_delimiter),
        ] {
            if !delim.is_ascii() {
                return Err(PrepError::Config(format!("{} must be a single ASCII character", name)));
            }
        }
        Ok(())
    }

    pub fn vocabulary(&self) -> GlobalVocabulary {
        self.vocabulary.clone().unwrap_or_else(|| {
            GlobalVocabulary::derive(
                &self.taxonomy,
                &self.port_hierarchy,
                self.unknown_protocol == UnknownProtocolPolicy::Categorize,
            )
        })
    }

    pub fn thread_count(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}

/// Reads a JSON document, substituting the empty value when the file is
/// missing or malformed. Callers treat the empty value as "no rules".
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            error!("JSON file '{}' could not be read: {}", path.display(), e);
            return T::default();
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            error!("Failed to decode JSON from file '{}': {}", path.display(), e);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = PrepConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.split.seed, 42);
        assert_eq!(config.chunk_size, 10_000);
    }

    #[test]
    fn test_bad_split_ratios() {
        let mut config = PrepConfig::default();
        config.split.training_size = 0.7;
        assert!(matches!(config.validate(), Err(PrepError::Config(_))));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"chunk_size": 500, "split": {{"seed": 7}}, "unknown_protocol": "categorize"}}"#).unwrap();
        let config = PrepConfig::load(file.path()).unwrap();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.split.seed, 7);
        assert_eq!(config.split.training_size, 0.6);
        assert_eq!(config.unknown_protocol, UnknownProtocolPolicy::Categorize);
        assert!(config.vocabulary().column("ip.protocol").unwrap().contains("Other"));
    }

    #[test]
    fn test_malformed_json_recovers_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let rules: Vec<crate::metadata::MaliciousRule> = load_json_or_default(file.path());
        assert!(rules.is_empty());
    }
}
