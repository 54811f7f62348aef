//! Global vocabularies shared by every device.
//!
//! These are fixed before any per-device fitting so that a label index or a
//! one-hot column means the same thing no matter which device's data
//! produced it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};
use crate::ports::PortHierarchy;
use crate::record::{DST_PORT, IP_PROTOCOL, SRC_PORT};

pub const OTHER_CATEGORY: &str = "Other";

/// Fine label -> coarse category, plus prefix renames applied before grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelTaxonomy {
    pub groups: BTreeMap<String, String>,
    #[serde(default)]
    pub renames: Vec<LabelRename>,
    #[serde(default = "default_other")]
    pub fallback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRename {
    pub prefix: String,
    pub replacement: String,
}

fn default_other() -> String {
    OTHER_CATEGORY.to_string()
}

impl LabelTaxonomy {
    pub fn iot_default() -> Self {
        let groups = [
            ("Benign", "Benign"),
            ("TCP Scan", "Network Scanning"),
            ("UDP Scan", "Network Scanning"),
            ("Telnet Brute Force", "Brute Force"),
            ("Reporting", "Infection"),
            ("Ingress Tool Transfer", "Infection"),
            ("File Download", "Infection"),
            ("CoAP Amplification", "DoS"),
            ("Merlin TCP Flooding", "DoS"),
            ("Merlin UDP Flooding", "DoS"),
            ("Merlin ICMP Flooding", "DoS"),
            ("Merlin C&C Communication", "C&C Communication"),
            ("Mirai TCP Flooding", "DoS"),
            ("Mirai UDP Flooding", "DoS"),
            ("Mirai GRE Flooding", "DoS"),
            ("Mirai C&C Communication", "C&C Communication"),
        ]
        .iter()
        .map(|(fine, coarse)| (fine.to_string(), coarse.to_string()))
        .collect();

        Self {
            groups,
            // the mirai rule files name their C&C traffic without the family
            renames: vec![LabelRename {
                prefix: "C&C Communication".to_string(),
                replacement: "Mirai C&C Communication".to_string(),
            }],
            fallback: default_other(),
        }
    }

    pub fn rename(&self, label: &str) -> String {
        for rename in &self.renames {
            if let Some(rest) = label.strip_prefix(rename.prefix.as_str()) {
                return format!("{}{}", rename.replacement, rest);
            }
        }
        label.to_string()
    }

    pub fn category(&self, label: &str) -> &str {
        self.groups
            .get(label)
            .map(|c| c.as_str())
            .unwrap_or(self.fallback.as_str())
    }

    pub fn fine_labels(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<String> = self.groups.values().cloned().collect();
        cats.push(self.fallback.clone());
        cats
    }
}

impl Default for LabelTaxonomy {
    fn default() -> Self {
        Self::iot_default()
    }
}

/// Closed, sorted set of values. Indices are positions in sorted order, so
/// two vocabularies built from the same values in any order agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    values: Vec<String>,
}

impl Vocabulary {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        values.sort();
        values.dedup();
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.values.binary_search_by(|v| v.as_str().cmp(value)).ok()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.index_of(value).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVocabulary {
    /// Categorical column -> allowed values.
    pub categorical: BTreeMap<String, Vocabulary>,
    pub labels: Vocabulary,
    pub label_categories: Vocabulary,
}

impl GlobalVocabulary {
    /// Derives every vocabulary from the shared taxonomy and port hierarchy.
    pub fn derive(taxonomy: &LabelTaxonomy, ports: &PortHierarchy, include_other_protocol: bool) -> Self {
        let mut protocols = vec!["ICMP", "TCP", "UDP"];
        if include_other_protocol {
            protocols.push(OTHER_CATEGORY);
        }
        let port_names = ports.category_names();

        let mut categorical = BTreeMap::new();
        categorical.insert(IP_PROTOCOL.to_string(), Vocabulary::new(protocols));
        categorical.insert(SRC_PORT.to_string(), Vocabulary::new(port_names.clone()));
        categorical.insert(DST_PORT.to_string(), Vocabulary::new(port_names));

        Self {
            categorical,
            labels: Vocabulary::new(taxonomy.fine_labels()),
            label_categories: Vocabulary::new(taxonomy.categories()),
        }
    }

    pub fn column(&self, name: &str) -> Result<&Vocabulary> {
        self.categorical
            .get(name)
            .ok_or_else(|| PrepError::Config(format!("no global vocabulary for column '{}'", name)))
    }

    pub fn label_index(&self, label: &str) -> Result<usize> {
        self.labels.index_of(label).ok_or_else(|| PrepError::UnseenLabel {
            granularity: "label".to_string(),
            value: label.to_string(),
        })
    }

    pub fn category_index(&self, category: &str) -> Result<usize> {
        self.label_categories
            .index_of(category)
            .ok_or_else(|| PrepError::UnseenLabel {
                granularity: "label_category".to_string(),
                value: category.to_string(),
            })
    }
}
