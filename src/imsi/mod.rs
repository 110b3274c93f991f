//! Subscriber identifier codec and range bookkeeping.
//!
//! # Responsibilities
//! - Assemble a decimal IMSI from its country/network/enterprise/subscriber
//!   components, driven by a per-site format descriptor
//! - Mask an IMSI down to its subscriber-number digits
//! - Coalesce adjacent identifier ranges
//!
//! # Format descriptor
//! A fixed-width 15-character string over the alphabet:
//! `C` country-code digit, `N` network-code digit, `E` enterprise-id digit,
//! `S` subscriber-number digit, `0` literal zero. Digits are consumed
//! right-to-left, one per matching position.

use thiserror::Error;

/// Required width of a format descriptor.
pub const FORMAT_LEN: usize = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImsiError {
    #[error("format must be {FORMAT_LEN} characters, got {0}")]
    BadLength(usize),

    #[error("unrecognized format character '{0}'")]
    BadChar(char),

    #[error("too many digits remain for component '{0}'")]
    Overflow(char),
}

/// Assemble an IMSI from its components.
///
/// Fails when a component still has undistributed digits after the format
/// is exhausted.
pub fn format_imsi(
    format: &str,
    country_code: u64,
    network_code: u64,
    enterprise_id: u64,
    subscriber: u64,
) -> Result<u64, ImsiError> {
    assemble(format, country_code, network_code, enterprise_id, subscriber, false)
}

/// Project out only the subscriber-number digits, emitting zero for every
/// non-`S` position. Strips enterprise and operator-identifying digits
/// before an identifier is handed to a downstream system.
pub fn mask_imsi(format: &str, subscriber: u64) -> Result<u64, ImsiError> {
    assemble(format, 0, 0, 0, subscriber, true)
}

fn assemble(
    format: &str,
    mut country_code: u64,
    mut network_code: u64,
    mut enterprise_id: u64,
    mut subscriber: u64,
    mask: bool,
) -> Result<u64, ImsiError> {
    if format.len() != FORMAT_LEN {
        return Err(ImsiError::BadLength(format.len()));
    }

    let mut result: u64 = 0;
    let mut position: u64 = 1;
    for c in format.chars().rev() {
        let digit = match c {
            'C' if !mask => take_digit(&mut country_code),
            'N' if !mask => take_digit(&mut network_code),
            'E' if !mask => take_digit(&mut enterprise_id),
            'C' | 'N' | 'E' | '0' => 0,
            'S' => take_digit(&mut subscriber),
            other => return Err(ImsiError::BadChar(other)),
        };
        result += digit * position;
        position = position.saturating_mul(10);
    }

    for (value, component) in [
        (country_code, 'C'),
        (network_code, 'N'),
        (enterprise_id, 'E'),
        (subscriber, 'S'),
    ] {
        if value != 0 {
            return Err(ImsiError::Overflow(component));
        }
    }
    Ok(result)
}

fn take_digit(value: &mut u64) -> u64 {
    let digit = *value % 10;
    *value /= 10;
    digit
}

/// A named, inclusive range of subscriber numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImsiRange {
    pub name: String,
    pub from: u64,
    pub to: u64,
}

impl ImsiRange {
    pub fn new(name: &str, from: u64, to: u64) -> Self {
        Self {
            name: name.to_string(),
            from,
            to,
        }
    }
}

/// Coalesce adjacent or overlapping ranges.
///
/// Input is sorted by lower bound first. A run of ranges that touch
/// (`next.from <= current.to + 1`) collapses into one synthesized range,
/// and every constituent's name is reported for deletion; untouched ranges
/// keep their names. Returns (merged ranges, names to delete).
pub fn merge_ranges(ranges: &[ImsiRange]) -> (Vec<ImsiRange>, Vec<String>) {
    let mut sorted: Vec<ImsiRange> = ranges.to_vec();
    sorted.sort_by_key(|r| (r.from, r.to));

    let mut merged = Vec::new();
    let mut deleted = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return (merged, deleted);
    };

    let mut group = vec![first];
    for range in iter {
        let current_to = group.iter().map(|r| r.to).max().unwrap_or(0);
        if range.from <= current_to.saturating_add(1) {
            group.push(range);
        } else {
            flush_group(std::mem::replace(&mut group, vec![range]), &mut merged, &mut deleted);
        }
    }
    flush_group(group, &mut merged, &mut deleted);
    (merged, deleted)
}

fn flush_group(group: Vec<ImsiRange>, merged: &mut Vec<ImsiRange>, deleted: &mut Vec<String>) {
    if group.len() == 1 {
        merged.extend(group);
        return;
    }
    let from = group.iter().map(|r| r.from).min().unwrap_or(0);
    let to = group.iter().map(|r| r.to).max().unwrap_or(0);
    deleted.extend(group.into_iter().map(|r| r.name));
    merged.push(ImsiRange {
        name: format!("range-{}-{}", from, to),
        from,
        to,
    });
}
