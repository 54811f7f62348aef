use serde::{Deserialize, Serialize};

/// Category given to ports outside every configured range (and to ICMP,
/// which has no ports at all).
pub const UNCATEGORIZED_PORT: &str = "";

/// Half-open port interval `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u32,
    pub end: u32,
    pub name: String,
}

impl PortRange {
    pub fn new(start: u32, end: u32, name: &str) -> Self {
        Self { start, end, name: name.to_string() }
    }

    pub fn single(port: u16, name: &str) -> Self {
        Self::new(port as u32, port as u32 + 1, name)
    }

    pub fn contains(&self, port: u32) -> bool {
        self.start <= port && port < self.end
    }
}

/// Ordered port categorisation. Ranges may overlap; the first one that
/// contains the port wins, so specific services go before the broad
/// IANA blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortHierarchy {
    ranges: Vec<PortRange>,
}

impl PortHierarchy {
    pub fn new(ranges: Vec<PortRange>) -> Self {
        Self { ranges }
    }

    /// Services commonly seen on IoT testbeds, then the IANA blocks.
    pub fn iot_default() -> Self {
        Self::new(vec![
            PortRange::single(20, "ftp"),
            PortRange::single(21, "ftp"),
            PortRange::single(22, "ssh"),
            PortRange::single(23, "telnet"),
            PortRange::single(53, "dns"),
            PortRange::new(67, 69, "dhcp"),
            PortRange::single(80, "http"),
            PortRange::single(123, "ntp"),
            PortRange::single(443, "https"),
            PortRange::single(1883, "mqtt"),
            PortRange::single(1900, "ssdp"),
            PortRange::single(2323, "telnet"),
            PortRange::single(5353, "mdns"),
            PortRange::single(5683, "coap"),
            PortRange::single(5684, "coap"),
            PortRange::single(8080, "http"),
            PortRange::single(8883, "mqtt"),
            PortRange::new(0, 1024, "well-known"),
            PortRange::new(1024, 49152, "registered"),
            PortRange::new(49152, 65536, "dynamic"),
        ])
    }

    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }

    pub fn categorize(&self, port: u32) -> &str {
        self.ranges
            .iter()
            .find(|range| range.contains(port))
            .map(|range| range.name.as_str())
            .unwrap_or(UNCATEGORIZED_PORT)
    }

    /// Missing ports (ICMP) fall through to the uncategorised bucket.
    pub fn categorize_opt(&self, port: Option<u16>) -> &str {
        match port {
            Some(p) => self.categorize(p as u32),
            None => UNCATEGORIZED_PORT,
        }
    }

    /// Every name this hierarchy can produce, uncategorised included.
    pub fn category_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ranges.iter().map(|r| r.name.clone()).collect();
        names.push(UNCATEGORIZED_PORT.to_string());
        names.sort();
        names.dedup();
        names
    }
}

impl Default for PortHierarchy {
    fn default() -> Self {
        Self::iot_default()
    }
}
