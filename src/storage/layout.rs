//! Mapping between content ids and spool paths.
//!
//! An id is rendered as lowercase hex, zero-padded to at least eight digits.
//! The first three digit pairs become nested directories and whatever is left
//! becomes the file name, so `0x2a` lives at `00/00/00/2a`.

use crate::catalog_store::ContentId;
use std::path::{Path, PathBuf};

pub const INCOMING_DIR: &str = "incoming";
pub const LOST_AND_FOUND_DIR: &str = "lost+found";

const SHARD_LEVELS: usize = 3;
const MIN_HEX_DIGITS: usize = 8;

/// Path of `content_id` relative to the partition root.
pub fn relative_path(content_id: ContentId) -> PathBuf {
    let hex = format!("{:0width$x}", content_id, width = MIN_HEX_DIGITS);
    let mut path = PathBuf::new();
    for level in 0..SHARD_LEVELS {
        path.push(&hex[level * 2..level * 2 + 2]);
    }
    path.push(&hex[SHARD_LEVELS * 2..]);
    path
}

/// Whether a directory name is a shard level (`[0-9a-f]{2}`).
pub fn is_shard_name(name: &str) -> bool {
    name.len() == 2 && name.bytes().all(is_lower_hex)
}

/// Whether a file name can be a shard leaf (`[0-9a-f]+`).
pub fn is_leaf_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_lower_hex)
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

/// Recover the content id from a path relative to the partition root.
/// Returns `None` for anything that is not a well-formed shard path.
pub fn content_id_from_relative(path: &Path) -> Option<ContentId> {
    let parts: Vec<&str> = path
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    if parts.len() != SHARD_LEVELS + 1 {
        return None;
    }
    let (dirs, leaf) = parts.split_at(SHARD_LEVELS);
    if !dirs.iter().all(|d| is_shard_name(d)) || !is_leaf_name(leaf[0]) {
        return None;
    }
    let hex: String = parts.concat();
    let id = ContentId::from_str_radix(&hex, 16).ok()?;
    // Reject non-canonical spellings such as extra leading zeros.
    if relative_path(id) == path {
        Some(id)
    } else {
        None
    }
}

pub fn absolute_path(root: &Path, content_id: ContentId) -> PathBuf {
    root.join(relative_path(content_id))
}
