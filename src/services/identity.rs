//! Deterministic channel identity
//!
//! Ids are derived from `name + "-" + url`. The default scheme is a 32-bit
//! rolling hash over UTF-16 code units rendered in base-36, so ids match
//! those produced by existing web clients. It can collide; the parser keeps
//! the last record for a colliding id.

use sha1::{Digest, Sha1};
use std::str::FromStr;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// How channel ids are computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdScheme {
    /// 32-bit rolling hash, base-36
    #[default]
    Legacy32,
    /// SHA-1 hex digest, for large merged catalogs
    Sha1,
}

impl FromStr for IdScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy32" | "legacy" => Ok(Self::Legacy32),
            "sha1" => Ok(Self::Sha1),
            other => Err(format!("unknown id scheme: {}", other)),
        }
    }
}

impl IdScheme {
    pub fn channel_id(&self, name: &str, url: &str) -> String {
        match self {
            IdScheme::Legacy32 => hash(name, url),
            IdScheme::Sha1 => sha1_id(name, url),
        }
    }
}

/// Channel id for a (name, url) pair using the default scheme
pub fn hash(name: &str, url: &str) -> String {
    let h = format!("{}-{}", name, url)
        .encode_utf16()
        .fold(0i32, |acc, unit| {
            acc.wrapping_mul(31).wrapping_add(unit as i32)
        });
    to_base36(h.unsigned_abs())
}

fn sha1_id(name: &str, url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(name.as_bytes());
    hasher.update(b"-");
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn to_base36(mut n: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(7);
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    // Only ASCII digits were pushed
    String::from_utf8(digits).unwrap_or_default()
}
