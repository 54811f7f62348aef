//! Ground-truth labelling of captured traffic.
//!
//! Labels are assigned in two passes over the traffic of a single device:
//! an unconditional pass for conversations with the device's known peers,
//! then an ordered pass over attack signatures that only touches rows still
//! unlabelled. The first signature to claim a row keeps it.

use std::fmt;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::error::{PrepError, Result};
use crate::metadata::{DeviceMetadata, MaliciousRule, MaliciousRuleSet, NormalMetadata};
use crate::record::{TrafficRecord, UNKNOWN_LABEL};

lazy_static! {
    static ref DEVICE_FILENAME: Regex = Regex::new(r"^([a-zA-Z-]+)-([0-9]+)").unwrap();
}

const WILDCARD_PAIR: &str = "x.x";
const WILDCARD_OCTET: &str = "x";
const STRICT_OCTET: &str = "[0-9]{1,3}";
const IPV4_OCTETS: usize = 4;

/// A device instance parsed from a capture filename such as
/// `smart-plug-2.csv`. `instance` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub device_type: String,
    pub instance: usize,
}

impl DeviceId {
    pub fn parse(filename: &str) -> Result<Self> {
        let caps = DEVICE_FILENAME
            .captures(filename)
            .ok_or_else(|| PrepError::InvalidFilename(filename.to_string()))?;
        let instance = caps[2]
            .parse::<usize>()
            .map_err(|_| PrepError::InvalidFilename(filename.to_string()))?;
        Ok(Self {
            device_type: caps[1].to_string(),
            instance,
        })
    }

    /// 0-based position in the device's address list.
    pub fn index(&self) -> Option<usize> {
        self.instance.checked_sub(1)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.device_type, self.instance)
    }
}

/// Compiled source/destination address pattern of a malicious rule.
#[derive(Debug, Clone)]
pub struct IpPattern {
    raw: String,
    regex: Regex,
}

impl IpPattern {
    /// Legacy mode substitutes the wildcard with `.*` and leaves the dots
    /// unescaped, matching from the start of the address only. Strict mode
    /// escapes dots, limits a wildcard to one octet and anchors both ends;
    /// a trailing wildcard in a short pattern (`x.x`, `10.0.x`) also covers
    /// the octets the pattern leaves out.
    pub fn compile(pattern: &str, strict: bool) -> Result<Self> {
        let source = if strict {
            let parts: Vec<&str> = pattern.split('.').collect();
            let missing = IPV4_OCTETS.saturating_sub(parts.len());
            let last = parts.len() - 1;
            let octets: Vec<String> = parts
                .iter()
                .enumerate()
                .map(|(i, octet)| match *octet {
                    WILDCARD_OCTET if i == last && missing > 0 => {
                        format!(r"{}(?:\.{}){{{}}}", STRICT_OCTET, STRICT_OCTET, missing)
                    }
                    WILDCARD_OCTET => STRICT_OCTET.to_string(),
                    other => regex::escape(other),
                })
                .collect();
            format!("^{}$", octets.join(r"\."))
        } else {
            let expanded = pattern.replace(WILDCARD_PAIR, ".*");
            let octets: Vec<&str> = expanded
                .split('.')
                .map(|octet| if octet == WILDCARD_OCTET { ".*" } else { octet })
                .collect();
            format!("^(?:{})", octets.join("."))
        };
        Ok(Self {
            raw: pattern.to_string(),
            regex: Regex::new(&source)?,
        })
    }

    pub fn matches(&self, ip: &str) -> bool {
        self.regex.is_match(ip)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: MaliciousRule,
    source: IpPattern,
    destination: IpPattern,
}

impl CompiledRule {
    fn compile(rule: MaliciousRule, strict: bool) -> Result<Self> {
        Ok(Self {
            source: IpPattern::compile(&rule.source_ip, strict)?,
            destination: IpPattern::compile(&rule.destination_ip, strict)?,
            rule,
        })
    }

    fn matches(&self, record: &TrafficRecord) -> bool {
        let (Some(src), Some(dst)) = (record.ip_src.as_deref(), record.ip_dst.as_deref()) else {
            return false;
        };
        if !self.source.matches(src) || !self.destination.matches(dst) {
            return false;
        }
        // ports only constrain the match when both are given
        if let (Some(sp), Some(dp)) = (self.rule.source_port, self.rule.destination_port) {
            if record.transport_ports() != (Some(sp), Some(dp)) {
                return false;
            }
        }
        if let Some(proto) = self.rule.protocol {
            if record.ip_proto != Some(proto) {
                return false;
            }
        }
        true
    }
}

/// Device resolved from a filename, borrowed from the labeller's metadata.
#[derive(Debug, Clone)]
pub struct DeviceContext<'a> {
    pub device: DeviceId,
    pub metadata: &'a DeviceMetadata,
    pub device_ip: &'a str,
}

pub struct Labeller {
    normal: NormalMetadata,
    rules: Vec<CompiledRule>,
}

impl Labeller {
    pub fn new(normal: NormalMetadata, rules: MaliciousRuleSet, strict_ip_patterns: bool) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| CompiledRule::compile(rule, strict_ip_patterns))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { normal, rules })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn resolve(&self, filename: &str) -> Result<DeviceContext<'_>> {
        let device = DeviceId::parse(filename)?;
        resolve_device(&self.normal, device)
    }

    /// Labels one batch (or chunk) for an already resolved device.
    pub fn label_records(&self, ctx: &DeviceContext<'_>, records: Vec<TrafficRecord>) -> Vec<TrafficRecord> {
        let mut records = filter_traffic_by_device(records, ctx.device_ip);
        for record in records.iter_mut() {
            record.label = UNKNOWN_LABEL.to_string();
        }
        label_normal_traffic(&mut records, ctx.device_ip, ctx.metadata);
        self.label_malicious_traffic(&mut records);
        records
    }

    pub fn label_data(&self, filename: &str, records: Vec<TrafficRecord>) -> Result<Vec<TrafficRecord>> {
        let ctx = self.resolve(filename)?;
        Ok(self.label_records(&ctx, records))
    }

    /// Applies the malicious rules in order; only unlabelled rows change.
    pub fn label_malicious_traffic(&self, records: &mut [TrafficRecord]) {
        for compiled in &self.rules {
            let mut claimed = 0usize;
            for record in records.iter_mut().filter(|r| r.is_unlabelled()) {
                if compiled.matches(record) {
                    record.label = compiled.rule.label.clone();
                    claimed += 1;
                }
            }
            debug!(
                "rule {} -> {} '{}' claimed {} rows",
                compiled.source.as_str(),
                compiled.destination.as_str(),
                compiled.rule.label,
                claimed
            );
        }
    }
}

pub fn resolve_device(normal: &NormalMetadata, device: DeviceId) -> Result<DeviceContext<'_>> {
    let metadata = normal
        .get(&device.device_type)
        .ok_or_else(|| PrepError::UnknownDevice(device.device_type.clone()))?;
    let device_ip = device
        .index()
        .and_then(|i| metadata.device_ip.get(i))
        .ok_or_else(|| PrepError::DeviceIndexOutOfRange {
            device: device.device_type.clone(),
            instance: device.instance,
            available: metadata.device_ip.len(),
        })?;
    Ok(DeviceContext {
        device,
        metadata,
        device_ip: device_ip.as_str(),
    })
}

pub fn filter_traffic_by_device(records: Vec<TrafficRecord>, device_ip: &str) -> Vec<TrafficRecord> {
    records.into_iter().filter(|r| r.involves(device_ip)).collect()
}

/// Overwrites the label of every conversation between the device and one
/// of its known peers. Later peers win over earlier ones.
pub fn label_normal_traffic(records: &mut [TrafficRecord], device_ip: &str, metadata: &DeviceMetadata) {
    for server_ip in &metadata.server_ip {
        for record in records.iter_mut() {
            if record.is_between(device_ip, server_ip) {
                record.label = metadata.label.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normal() -> NormalMetadata {
        let mut meta = NormalMetadata::new();
        meta.insert(
            "smart-plug".to_string(),
            DeviceMetadata {
                device_ip: vec!["10.0.0.5".to_string(), "10.0.0.6".to_string()],
                server_ip: vec!["8.8.8.8".to_string(), "52.1.1.1".to_string()],
                label: "Benign".to_string(),
            },
        );
        meta
    }

    fn tcp(src: &str, dst: &str, sport: u16, dport: u16) -> TrafficRecord {
        let mut r = TrafficRecord::between(src, dst);
        r.ip_proto = Some(6);
        r.tcp_srcport = Some(sport);
        r.tcp_dstport = Some(dport);
        r
    }

    #[test]
    fn test_parse_filename() {
        let id = DeviceId::parse("smart-plug-2.csv").unwrap();
        assert_eq!(id.device_type, "smart-plug");
        assert_eq!(id.instance, 2);
        assert_eq!(id.index(), Some(1));
        assert_eq!(id.to_string(), "smart-plug-2");
        assert!(matches!(DeviceId::parse("capture.csv"), Err(PrepError::InvalidFilename(_))));
        assert!(matches!(DeviceId::parse("2-plug.csv"), Err(PrepError::InvalidFilename(_))));
    }

    #[test]
    fn test_resolve_errors() {
        let labeller = Labeller::new(normal(), vec![], false).unwrap();
        assert_eq!(labeller.resolve("smart-plug-2.csv").unwrap().device_ip, "10.0.0.6");
        assert!(matches!(labeller.resolve("camera-1.csv"), Err(PrepError::UnknownDevice(_))));
        assert!(matches!(
            labeller.resolve("smart-plug-3.csv"),
            Err(PrepError::DeviceIndexOutOfRange { instance: 3, available: 2, .. })
        ));
        assert!(matches!(
            labeller.resolve("smart-plug-0.csv"),
            Err(PrepError::DeviceIndexOutOfRange { instance: 0, .. })
        ));
    }

    #[test]
    fn test_legacy_pattern_is_permissive() {
        let p = IpPattern::compile("192.168.x.x", false).unwrap();
        assert!(p.matches("192.168.1.20"));
        // unescaped dots match any character
        assert!(p.matches("192a168b"));
        let p = IpPattern::compile("1.2.3.x", false).unwrap();
        assert!(p.matches("1.2.3.4"));
        // prefix anchored only
        let p = IpPattern::compile("1.2.3.4", false).unwrap();
        assert!(p.matches("1.2.3.45"));
        assert!(!p.matches("11.2.3.4"));
    }

    #[test]
    fn test_strict_pattern() {
        let p = IpPattern::compile("192.168.x.x", true).unwrap();
        assert!(p.matches("192.168.1.20"));
        assert!(!p.matches("192a168b1c2"));
        let p = IpPattern::compile("1.2.3.4", true).unwrap();
        assert!(!p.matches("1.2.3.45"));
    }

    #[test]
    fn test_strict_trailing_wildcard_covers_remaining_octets() {
        let any = IpPattern::compile("x.x", true).unwrap();
        assert!(any.matches("1.2.3.4"));
        assert!(any.matches("192.168.100.200"));
        assert!(!any.matches("1.2.3.4.5"));
        let subnet = IpPattern::compile("10.0.x", true).unwrap();
        assert!(subnet.matches("10.0.3.4"));
        assert!(!subnet.matches("10.1.3.4"));

        let rules = vec![MaliciousRule::new("10.0.0.x", "x.x", "Mirai UDP Flooding")];
        let labeller = Labeller::new(normal(), rules, true).unwrap();
        let labelled = labeller
            .label_data("smart-plug-1.csv", vec![tcp("10.0.0.5", "1.2.3.4", 40000, 80)])
            .unwrap();
        assert_eq!(labelled[0].label, "Mirai UDP Flooding");
    }

    #[test]
    fn test_device_filter_drops_foreign_traffic() {
        let labeller = Labeller::new(normal(), vec![], false).unwrap();
        let records = vec![
            tcp("10.0.0.5", "8.8.8.8", 40000, 443),
            tcp("10.0.0.6", "8.8.8.8", 40000, 443),
            tcp("1.1.1.1", "10.0.0.5", 53, 40001),
        ];
        let labelled = labeller.label_data("smart-plug-1.csv", records).unwrap();
        assert_eq!(labelled.len(), 2);
        assert_eq!(labelled[0].label, "Benign");
        assert_eq!(labelled[1].label, "Unknown");
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = vec![
            MaliciousRule::new("10.0.0.x", "1.2.3.x", "TCP Scan").with_protocol(6),
            MaliciousRule::new("10.0.0.x", "1.2.x.x", "Mirai TCP Flooding"),
        ];
        let labeller = Labeller::new(normal(), rules, false).unwrap();
        let mut records = vec![tcp("10.0.0.5", "1.2.3.4", 1, 2), tcp("10.0.0.5", "1.2.9.9", 1, 2)];
        labeller.label_malicious_traffic(&mut records);
        assert_eq!(records[0].label, "TCP Scan");
        assert_eq!(records[1].label, "Mirai TCP Flooding");

        // running the pass again changes nothing
        let before = records.clone();
        labeller.label_malicious_traffic(&mut records);
        assert_eq!(records, before);
    }

    #[test]
    fn test_port_condition_needs_both_ports() {
        let mut one_port = MaliciousRule::new("10.0.0.x", "x.x", "Telnet Brute Force");
        one_port.destination_port = Some(23);
        let both = MaliciousRule::new("10.0.0.x", "x.x", "CoAP Amplification").with_ports(5683, 40000);
        let labeller = Labeller::new(normal(), vec![both, one_port], false).unwrap();

        let mut records = vec![tcp("10.0.0.5", "9.9.9.9", 1234, 80)];
        let mut udp = TrafficRecord::between("10.0.0.5", "9.9.9.9");
        udp.ip_proto = Some(17);
        udp.udp_srcport = Some(5683);
        udp.udp_dstport = Some(40000);
        records.push(udp);
        labeller.label_malicious_traffic(&mut records);
        // a lone destination port is not a constraint
        assert_eq!(records[0].label, "Telnet Brute Force");
        assert_eq!(records[1].label, "CoAP Amplification");
    }

    #[test]
    fn test_protocol_mismatch() {
        let rules = vec![MaliciousRule::new("10.0.0.x", "x.x", "UDP Scan").with_protocol(17)];
        let labeller = Labeller::new(normal(), rules, false).unwrap();
        let mut records = vec![tcp("10.0.0.5", "4.4.4.4", 1, 2)];
        labeller.label_malicious_traffic(&mut records);
        assert!(records[0].is_unlabelled());
    }

    #[test]
    fn test_later_server_overwrites() {
        let mut meta = normal();
        meta.get_mut("smart-plug").unwrap().server_ip = vec!["8.8.8.8".into(), "8.8.8.8".into()];
        let labeller = Labeller::new(meta, vec![], false).unwrap();
        let labelled = labeller
            .label_data("smart-plug-1.csv", vec![tcp("8.8.8.8", "10.0.0.5", 443, 40000)])
            .unwrap();
        assert_eq!(labelled[0].label, "Benign");
    }
}
