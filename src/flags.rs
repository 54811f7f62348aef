use crate::error::{PrepError, Result};

pub const IP_FLAG_BITS: usize = 3;
pub const TCP_FLAG_BITS: usize = 9;
pub const FLAG_WIDTH: usize = IP_FLAG_BITS + TCP_FLAG_BITS;

// TCP flag bits, least significant first
const TCP_FLAG_NAMES: [&str; TCP_FLAG_BITS] = [
    "fin", "syn", "rst", "psh", "ack", "urg", "ece", "cwr", "ns",
];

/// Fill value written in place of missing flag fields.
pub const MISSING_SENTINEL: &str = "-1";

/// Unpacks the hex-encoded `ip.flags` / `tcp.flags` fields into a
/// fixed-width bit vector: the 3 low bits of the IP flags byte followed
/// by the 9 low bits of the TCP flags, both least-significant-bit first.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlagDecoder;

impl FlagDecoder {
    pub fn new() -> Self {
        FlagDecoder
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = (0..IP_FLAG_BITS).map(|i| format!("ip.flags_b{}", i)).collect();
        names.extend(TCP_FLAG_NAMES.iter().map(|n| format!("tcp.flags_{}", n)));
        names
    }

    pub fn decode(&self, ip_flags_hex: &str, tcp_flags_hex: &str) -> Result<[bool; FLAG_WIDTH]> {
        // the IP flags share a byte with the fragment offset high bits; only
        // the low byte is kept
        let ip = parse_flag_hex(ip_flags_hex)? as u8;
        let tcp = parse_flag_hex(tcp_flags_hex)? as u16;

        let mut bits = [false; FLAG_WIDTH];
        for (i, bit) in bits.iter_mut().take(IP_FLAG_BITS).enumerate() {
            *bit = ip & (1 << i) != 0;
        }
        for i in 0..TCP_FLAG_BITS {
            bits[IP_FLAG_BITS + i] = tcp & (1 << i) != 0;
        }
        Ok(bits)
    }

    /// Decoded bits as 0.0 / 1.0, ready to be laid into a feature row.
    pub fn decode_f64(&self, ip_flags_hex: &str, tcp_flags_hex: &str) -> Result<[f64; FLAG_WIDTH]> {
        let bits = self.decode(ip_flags_hex, tcp_flags_hex)?;
        let mut out = [0.0; FLAG_WIDTH];
        for (o, b) in out.iter_mut().zip(bits.iter()) {
            *o = if *b { 1.0 } else { 0.0 };
        }
        Ok(out)
    }

    /// Inverse of `decode` for the bits that are kept.
    pub fn repack(&self, bits: &[bool; FLAG_WIDTH]) -> (u8, u16) {
        let mut ip = 0u8;
        for (i, bit) in bits.iter().take(IP_FLAG_BITS).enumerate() {
            if *bit {
                ip |= 1 << i;
            }
        }
        let mut tcp = 0u16;
        for (i, bit) in bits[IP_FLAG_BITS..].iter().enumerate() {
            if *bit {
                tcp |= 1 << i;
            }
        }
        (ip, tcp)
    }
}

/// Parses `0x0018`, `18` or `0X18`. Empty fields and the fill sentinel
/// read as zero.
pub fn parse_flag_hex(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == MISSING_SENTINEL {
        return Ok(0);
    }
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16)
        .map_err(|e| PrepError::Parse(format!("invalid flag field '{}': {}", value, e)))
}
