//! Utility functions for identifiers and hashing

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32, the hrp tells the entity apart
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Deterministic key for the `index`-th side effect of a committed booking revision.
///
/// Re-deriving the key for the same revision always yields the same digest,
/// which lets a sink drop a redelivered entry instead of storing it twice.
pub fn revision_digest(booking_id: &str, version: u64, index: usize) -> String {
    sha256::digest(format!("{booking_id}/{version}/{index}"))
}

/// Secondary index prefix for everything filed under `owner`.
///
/// The owner is length-prefixed so that no owner's prefix is a prefix of
/// another owner's keys, whatever characters the id contains.
pub fn index_prefix(owner: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + owner.len());
    prefix.extend_from_slice(&(owner.len() as u32).to_be_bytes());
    prefix.extend_from_slice(owner.as_bytes());
    prefix
}

/// Secondary index key filing `entry` under `owner`.
pub fn index_key(owner: &str, entry: &str) -> Vec<u8> {
    let mut key = index_prefix(owner);
    key.extend_from_slice(entry.as_bytes());
    key
}

/// The entry part of a key built by [`index_key`] for `owner`.
pub fn index_entry(owner: &str, key: &[u8]) -> Option<String> {
    key.strip_prefix(index_prefix(owner).as_slice())
        .map(|entry| String::from_utf8_lossy(entry).into_owned())
}

/// Truncate `text` to at most `max_chars` characters, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
