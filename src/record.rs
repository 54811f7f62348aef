//! Row types flowing through the pipeline.
//!
//! `TrafficRecord` mirrors the extractor's field names one to one so it can
//! be read straight from its delimited output. `FeatureRow` is the fixed
//! output schema of the transformer.

use serde::{Deserialize, Serialize};

pub const UNKNOWN_LABEL: &str = "Unknown";

// Derived column names shared by the transformer, the vocabularies and the
// encoder.
pub const IP_PROTOCOL: &str = "ip.protocol";
pub const SRC_PORT: &str = "src.port";
pub const DST_PORT: &str = "dst.port";
pub const LABEL: &str = "label";
pub const LABEL_CATEGORY: &str = "label_category";

/// One captured packet as emitted by the extractor, plus its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficRecord {
    #[serde(rename = "frame.time")]
    pub frame_time: Option<String>,
    #[serde(rename = "frame.len")]
    pub frame_len: Option<f64>,
    #[serde(rename = "frame.protocols")]
    pub frame_protocols: Option<String>,
    #[serde(rename = "ip.src")]
    pub ip_src: Option<String>,
    #[serde(rename = "ip.dst")]
    pub ip_dst: Option<String>,
    #[serde(rename = "ip.proto")]
    pub ip_proto: Option<u8>,
    #[serde(rename = "ip.flags")]
    pub ip_flags: Option<String>,
    #[serde(rename = "ip.ttl")]
    pub ip_ttl: Option<f64>,
    #[serde(rename = "ip.checksum")]
    pub ip_checksum: Option<String>,
    #[serde(rename = "tcp.srcport")]
    pub tcp_srcport: Option<u16>,
    #[serde(rename = "tcp.dstport")]
    pub tcp_dstport: Option<u16>,
    #[serde(rename = "udp.srcport")]
    pub udp_srcport: Option<u16>,
    #[serde(rename = "udp.dstport")]
    pub udp_dstport: Option<u16>,
    #[serde(rename = "tcp.flags")]
    pub tcp_flags: Option<String>,
    #[serde(rename = "tcp.window_size_value")]
    pub tcp_window_size_value: Option<f64>,
    #[serde(rename = "tcp.window_size_scalefactor")]
    pub tcp_window_size_scalefactor: Option<f64>,
    #[serde(rename = "tcp.checksum")]
    pub tcp_checksum: Option<String>,
    #[serde(rename = "tcp.options")]
    pub tcp_options: Option<String>,
    #[serde(rename = "tcp.pdu.size")]
    pub tcp_pdu_size: Option<f64>,
    pub label: String,
}

impl Default for TrafficRecord {
    fn default() -> Self {
        Self {
            frame_time: None,
            frame_len: None,
            frame_protocols: None,
            ip_src: None,
            ip_dst: None,
            ip_proto: None,
            ip_flags: None,
            ip_ttl: None,
            ip_checksum: None,
            tcp_srcport: None,
            tcp_dstport: None,
            udp_srcport: None,
            udp_dstport: None,
            tcp_flags: None,
            tcp_window_size_value: None,
            tcp_window_size_scalefactor: None,
            tcp_checksum: None,
            tcp_options: None,
            tcp_pdu_size: None,
            label: UNKNOWN_LABEL.to_string(),
        }
    }
}

impl TrafficRecord {
    pub fn between(src: &str, dst: &str) -> Self {
        Self {
            ip_src: Some(src.to_string()),
            ip_dst: Some(dst.to_string()),
            ..Default::default()
        }
    }

    pub fn src(&self) -> &str {
        self.ip_src.as_deref().unwrap_or("")
    }

    pub fn dst(&self) -> &str {
        self.ip_dst.as_deref().unwrap_or("")
    }

    pub fn involves(&self, ip: &str) -> bool {
        self.ip_src.as_deref() == Some(ip) || self.ip_dst.as_deref() == Some(ip)
    }

    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.src() == a && self.dst() == b) || (self.src() == b && self.dst() == a)
    }

    pub fn is_unlabelled(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }

    /// Transport ports as seen by rule matching: TCP first, then UDP.
    pub fn transport_ports(&self) -> (Option<u16>, Option<u16>) {
        if self.tcp_srcport.is_some() || self.tcp_dstport.is_some() {
            (self.tcp_srcport, self.tcp_dstport)
        } else {
            (self.udp_srcport, self.udp_dstport)
        }
    }
}

/// The fixed, ML-facing schema produced by the transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub timestamp: i64,
    #[serde(rename = "frame.len")]
    pub frame_len: f64,
    #[serde(rename = "ip.protocol")]
    pub ip_protocol: String,
    #[serde(rename = "src.port")]
    pub src_port: String,
    #[serde(rename = "dst.port")]
    pub dst_port: String,
    #[serde(rename = "ip.flags")]
    pub ip_flags: String,
    #[serde(rename = "ip.ttl")]
    pub ip_ttl: f64,
    #[serde(rename = "ip.checksum")]
    pub ip_checksum: f64,
    #[serde(rename = "tcp.flags")]
    pub tcp_flags: String,
    #[serde(rename = "tcp.window_size_value")]
    pub tcp_window_size_value: f64,
    #[serde(rename = "tcp.window_size_scalefactor")]
    pub tcp_window_size_scalefactor: f64,
    #[serde(rename = "tcp.checksum")]
    pub tcp_checksum: f64,
    #[serde(rename = "tcp.options")]
    pub tcp_options: f64,
    #[serde(rename = "tcp.pdu.size")]
    pub tcp_pdu_size: f64,
    pub label: String,
    pub label_category: String,
}

pub const NUMERIC_FEATURE_COUNT: usize = 9;

/// Standardized columns, in the order `FeatureRow::numeric_values` yields them.
pub const NUMERIC_FEATURES: [&str; NUMERIC_FEATURE_COUNT] = [
    "timestamp",
    "frame.len",
    "ip.ttl",
    "ip.checksum",
    "tcp.window_size_value",
    "tcp.window_size_scalefactor",
    "tcp.checksum",
    "tcp.options",
    "tcp.pdu.size",
];

/// Columns one-hot encoded against the global vocabulary, in output order.
pub const CATEGORICAL_FEATURES: [&str; 3] = [IP_PROTOCOL, SRC_PORT, DST_PORT];

impl FeatureRow {
    pub fn numeric_names() -> Vec<&'static str> {
        NUMERIC_FEATURES.to_vec()
    }

    /// Numeric columns in schema order.
    pub fn numeric_values(&self) -> [f64; NUMERIC_FEATURE_COUNT] {
        [
            self.timestamp as f64,
            self.frame_len,
            self.ip_ttl,
            self.ip_checksum,
            self.tcp_window_size_value,
            self.tcp_window_size_scalefactor,
            self.tcp_checksum,
            self.tcp_options,
            self.tcp_pdu_size,
        ]
    }

    pub fn categorical_value(&self, column: &str) -> Option<&str> {
        match column {
            IP_PROTOCOL => Some(&self.ip_protocol),
            SRC_PORT => Some(&self.src_port),
            DST_PORT => Some(&self.dst_port),
            _ => None,
        }
    }

    pub fn is_unlabelled(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }

    pub fn stratum(&self) -> (&str, &str) {
        (&self.label, &self.label_category)
    }
}
