//! Raw packet fields -> fixed feature schema.
//!
//! Every step works on one record at a time, so results do not depend on
//! row order or on how a file was chunked.

use std::fmt;

use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

use crate::config::UnknownProtocolPolicy;
use crate::error::{PrepError, Result};
use crate::flags::MISSING_SENTINEL;
use crate::ports::PortHierarchy;
use crate::record::{FeatureRow, TrafficRecord};
use crate::vocab::{LabelTaxonomy, OTHER_CATEGORY};

pub const FRAME_TIME_FORMAT: &str = "%b %d, %Y %H:%M:%S%.f";
pub const MISSING_NUMERIC: f64 = -1.0;
pub const MISSING_TIMESTAMP: i64 = -1;

lazy_static! {
    static ref TIMEZONE_SUFFIX: Regex = Regex::new(r"\s+(BST|GMT|UTC|CEST|CET)\b").unwrap();
    static ref REPEATED_SPACE: Regex = Regex::new(r"\s{2,}").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl Protocol {
    /// Looks for the transport marker in a `frame.protocols` stack such as
    /// `eth:ethertype:ip:tcp:tls`. TCP is checked first, then UDP, then ICMP.
    pub fn from_stack(stack: &str) -> Option<Protocol> {
        if stack.contains(":tcp") {
            Some(Protocol::Tcp)
        } else if stack.contains(":udp") {
            Some(Protocol::Udp)
        } else if stack.contains(":icmp") {
            Some(Protocol::Icmp)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Other => OTHER_CATEGORY,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol plus the source/destination ports that belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolPorts {
    pub protocol: Protocol,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

/// Row counts for one transformed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub input_rows: usize,
    pub unknown_protocol: usize,
    pub unlabelled: usize,
    pub output_rows: usize,
}

impl TransformReport {
    pub fn merge(&mut self, other: &TransformReport) {
        self.input_rows += other.input_rows;
        self.unknown_protocol += other.unknown_protocol;
        self.unlabelled += other.unlabelled;
        self.output_rows += other.output_rows;
    }
}

pub fn derive_protocol(record: &TrafficRecord, policy: UnknownProtocolPolicy) -> Result<Option<ProtocolPorts>> {
    let stack = record.frame_protocols.as_deref().unwrap_or("");
    let derived = match Protocol::from_stack(stack) {
        Some(Protocol::Tcp) => ProtocolPorts {
            protocol: Protocol::Tcp,
            src_port: record.tcp_srcport,
            dst_port: record.tcp_dstport,
        },
        Some(Protocol::Udp) => ProtocolPorts {
            protocol: Protocol::Udp,
            src_port: record.udp_srcport,
            dst_port: record.udp_dstport,
        },
        Some(protocol) => ProtocolPorts {
            protocol,
            src_port: None,
            dst_port: None,
        },
        None => match policy {
            UnknownProtocolPolicy::Drop => return Ok(None),
            UnknownProtocolPolicy::Categorize => ProtocolPorts {
                protocol: Protocol::Other,
                src_port: None,
                dst_port: None,
            },
            UnknownProtocolPolicy::Reject => {
                return Err(PrepError::UnsupportedProtocolStack(stack.to_string()))
            }
        },
    };
    Ok(Some(derived))
}

/// `Jan  1, 2023 10:00:00.123456789 GMT` -> Unix seconds. The zone name is
/// discarded and the wall-clock time taken as UTC. Missing -> -1.
pub fn normalize_timestamp(frame_time: Option<&str>) -> Result<i64> {
    let Some(raw) = frame_time.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(MISSING_TIMESTAMP);
    };
    let stripped = TIMEZONE_SUFFIX.replace_all(raw, "");
    let cleaned = REPEATED_SPACE.replace_all(stripped.trim(), " ");
    let parsed = NaiveDateTime::parse_from_str(&cleaned, FRAME_TIME_FORMAT)
        .map_err(|e| PrepError::Parse(format!("frame.time '{}': {}", raw, e)))?;
    Ok(parsed.and_utc().timestamp())
}

fn hex_digits(value: &str) -> String {
    let trimmed = value.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .chars()
        .filter(|c| *c != ':')
        .collect()
}

/// Hex checksum -> integer value as f64. Missing -> 0.
pub fn parse_hex_checksum(value: Option<&str>) -> Result<f64> {
    let Some(value) = value.filter(|s| !s.trim().is_empty()) else {
        return Ok(0.0);
    };
    let digits = hex_digits(value);
    let parsed = u64::from_str_radix(&digits, 16)
        .map_err(|e| PrepError::Parse(format!("checksum '{}': {}", value, e)))?;
    Ok(parsed as f64)
}

/// TCP options are an arbitrarily long hex blob; the value is accumulated
/// in floating point so long option lists do not overflow.
pub fn parse_hex_options(value: Option<&str>) -> Result<f64> {
    let Some(value) = value.filter(|s| !s.trim().is_empty()) else {
        return Ok(0.0);
    };
    let mut acc = 0.0f64;
    for c in hex_digits(value).chars() {
        let digit = c
            .to_digit(16)
            .ok_or_else(|| PrepError::Parse(format!("tcp.options '{}': invalid hex digit '{}'", value, c)))?;
        acc = acc * 16.0 + digit as f64;
    }
    Ok(acc)
}

/// Drops rows still unlabelled. The row type already is the projected
/// schema, so applying this twice changes nothing.
pub fn select_columns(rows: Vec<FeatureRow>) -> Vec<FeatureRow> {
    rows.into_iter().filter(|r| !r.is_unlabelled()).collect()
}

fn or_missing(value: Option<f64>) -> f64 {
    value.unwrap_or(MISSING_NUMERIC)
}

fn flag_or_missing(value: Option<&String>) -> String {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(MISSING_SENTINEL)
        .to_string()
}

pub struct FeatureTransformer {
    ports: PortHierarchy,
    taxonomy: LabelTaxonomy,
    policy: UnknownProtocolPolicy,
}

impl FeatureTransformer {
    pub fn new(ports: PortHierarchy, taxonomy: LabelTaxonomy, policy: UnknownProtocolPolicy) -> Self {
        Self { ports, taxonomy, policy }
    }

    /// Derives the feature row of one record, before unlabelled rows are
    /// filtered. `None` means the record was dropped for its protocol.
    pub fn transform_record(&self, record: &TrafficRecord) -> Result<Option<FeatureRow>> {
        let Some(derived) = derive_protocol(record, self.policy)? else {
            return Ok(None);
        };
        let label = self.taxonomy.rename(&record.label);
        let label_category = self.taxonomy.category(&label).to_string();

        Ok(Some(FeatureRow {
            timestamp: normalize_timestamp(record.frame_time.as_deref())?,
            frame_len: or_missing(record.frame_len),
            ip_protocol: derived.protocol.as_str().to_string(),
            src_port: self.ports.categorize_opt(derived.src_port).to_string(),
            dst_port: self.ports.categorize_opt(derived.dst_port).to_string(),
            ip_flags: flag_or_missing(record.ip_flags.as_ref()),
            ip_ttl: or_missing(record.ip_ttl),
            ip_checksum: parse_hex_checksum(record.ip_checksum.as_deref())?,
            tcp_flags: flag_or_missing(record.tcp_flags.as_ref()),
            tcp_window_size_value: or_missing(record.tcp_window_size_value),
            tcp_window_size_scalefactor: or_missing(record.tcp_window_size_scalefactor),
            tcp_checksum: parse_hex_checksum(record.tcp_checksum.as_deref())?,
            tcp_options: parse_hex_options(record.tcp_options.as_deref())?,
            tcp_pdu_size: or_missing(record.tcp_pdu_size),
            label,
            label_category,
        }))
    }

    pub fn transform(&self, records: &[TrafficRecord]) -> Result<(Vec<FeatureRow>, TransformReport)> {
        let mut report = TransformReport {
            input_rows: records.len(),
            ..Default::default()
        };
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            match self.transform_record(record)? {
                Some(row) => rows.push(row),
                None => report.unknown_protocol += 1,
            }
        }
        let derived = rows.len();
        let rows = select_columns(rows);
        report.unlabelled = derived - rows.len();
        report.output_rows = rows.len();

        if report.unknown_protocol > 0 {
            warn!("dropped {} rows with an unsupported protocol stack", report.unknown_protocol);
        }
        debug!(
            "transformed {} -> {} rows ({} unlabelled)",
            report.input_rows, report.output_rows, report.unlabelled
        );
        Ok((rows, report))
    }
}
