//! Labelling metadata as it is loaded from JSON.
//!
//! Normal metadata maps a device type to the addresses of its physical
//! instances and the peers it talks to during benign operation. Malicious
//! metadata is one ordered rule list per attack campaign.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::load_json_or_default;

pub const DEFAULT_NORMAL_LABEL: &str = "Normal";
pub const DEFAULT_MALICIOUS_LABEL: &str = "Malicious";

fn default_normal_label() -> String {
    DEFAULT_NORMAL_LABEL.to_string()
}

fn default_malicious_label() -> String {
    DEFAULT_MALICIOUS_LABEL.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    /// One address per physical instance, indexed by `instance - 1`.
    #[serde(default)]
    pub device_ip: Vec<String>,
    /// Peers whose traffic with the device is benign.
    #[serde(default)]
    pub server_ip: Vec<String>,
    #[serde(default = "default_normal_label")]
    pub label: String,
}

/// Device type name -> metadata.
pub type NormalMetadata = BTreeMap<String, DeviceMetadata>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaliciousRule {
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub destination_ip: String,
    #[serde(default, deserialize_with = "number_or_string")]
    pub source_port: Option<u16>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub destination_port: Option<u16>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub protocol: Option<u8>,
    #[serde(default = "default_malicious_label")]
    pub label: String,
}

impl MaliciousRule {
    pub fn new(source_ip: &str, destination_ip: &str, label: &str) -> Self {
        Self {
            source_ip: source_ip.to_string(),
            destination_ip: destination_ip.to_string(),
            source_port: None,
            destination_port: None,
            protocol: None,
            label: label.to_string(),
        }
    }

    pub fn with_ports(mut self, source_port: u16, destination_port: u16) -> Self {
        self.source_port = Some(source_port);
        self.destination_port = Some(destination_port);
        self
    }

    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = Some(protocol);
        self
    }
}

/// Rules in evaluation order. Order matters: the first matching rule wins.
pub type MaliciousRuleSet = Vec<MaliciousRule>;

pub fn load_normal_metadata(path: &Path) -> NormalMetadata {
    load_json_or_default(path)
}

pub fn load_malicious_rules(path: &Path) -> MaliciousRuleSet {
    load_json_or_default(path)
}

// Metadata files written by hand mix `"protocol": "6"` and `"protocol": 6`.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

fn number_or_string<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let raw: Option<NumberOrString> = Option::deserialize(deserializer)?;
    let value = match raw {
        None => return Ok(None),
        Some(NumberOrString::Number(n)) => n,
        Some(NumberOrString::Text(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<u64>().map_err(serde::de::Error::custom)?
        }
    };
    T::try_from(value)
        .map(Some)
        .map_err(|_| serde::de::Error::custom(format!("value {} out of range", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_metadata_defaults() {
        let json = r#"{"smart-plug": {"device_ip": ["10.0.0.5"], "server_ip": ["8.8.8.8"]}}"#;
        let meta: NormalMetadata = serde_json::from_str(json).unwrap();
        let plug = &meta["smart-plug"];
        assert_eq!(plug.device_ip, vec!["10.0.0.5"]);
        assert_eq!(plug.label, "Normal");
    }

    #[test]
    fn test_rule_accepts_numeric_strings() {
        let json = r#"[
            {"source_ip": "10.0.0.x", "destination_ip": "1.2.3.x", "protocol": "6", "label": "TCP Scan"},
            {"source_ip": "a", "destination_ip": "b", "source_port": 5683, "destination_port": "40000", "protocol": 17}
        ]"#;
        let rules: MaliciousRuleSet = serde_json::from_str(json).unwrap();
        assert_eq!(rules[0].protocol, Some(6));
        assert_eq!(rules[0].source_port, None);
        assert_eq!(rules[1].source_port, Some(5683));
        assert_eq!(rules[1].destination_port, Some(40000));
        assert_eq!(rules[1].protocol, Some(17));
        assert_eq!(rules[1].label, "Malicious");
    }

    #[test]
    fn test_rule_rejects_out_of_range_port() {
        let json = r#"[{"source_ip": "a", "destination_ip": "b", "source_port": 70000}]"#;
        assert!(serde_json::from_str::<MaliciousRuleSet>(json).is_err());
    }

    #[test]
    fn test_missing_metadata_file_is_empty() {
        let rules = load_malicious_rules(Path::new("/nonexistent/metadata-mirai.json"));
        assert!(rules.is_empty());
        let normal = load_normal_metadata(Path::new("/nonexistent/metadata-normal.json"));
        assert!(normal.is_empty());
    }
}
