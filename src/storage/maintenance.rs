//! Destructive spool maintenance, allowed only on non-production hosts.

use super::layout;
use crate::error::{LibrarianError, LibrarianResult};
use regex::Regex;
use std::path::Path;
use tracing::{info, warn};

/// Decides whether destructive maintenance may run on this deployment.
pub struct MaintenanceGuard {
    public_hostname: String,
    production_pattern: Regex,
}

impl MaintenanceGuard {
    pub fn new(public_hostname: &str, production_pattern: &str) -> anyhow::Result<Self> {
        Ok(Self {
            public_hostname: public_hostname.to_string(),
            production_pattern: Regex::new(production_pattern)?,
        })
    }

    /// `requested_host` must name this deployment, and this deployment must
    /// not be production.
    pub fn check(&self, requested_host: &str) -> LibrarianResult<()> {
        if !requested_host.eq_ignore_ascii_case(&self.public_hostname) {
            return Err(LibrarianError::UnsafeMaintenance(format!(
                "requested host {:?} does not match configured host {:?}",
                requested_host, self.public_hostname
            )));
        }
        if self.production_pattern.is_match(&self.public_hostname) {
            return Err(LibrarianError::UnsafeMaintenance(format!(
                "{:?} is a production host",
                self.public_hostname
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClearReport {
    pub removed_shards: usize,
    pub skipped_entries: Vec<String>,
}

pub(super) fn clear_shards(root: &Path) -> LibrarianResult<ClearReport> {
    let mut report = ClearReport::default();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == layout::INCOMING_DIR || name == layout::LOST_AND_FOUND_DIR {
            continue;
        }
        if entry.file_type()?.is_dir() && layout::is_shard_name(&name) {
            std::fs::remove_dir_all(entry.path())?;
            report.removed_shards += 1;
        } else {
            warn!("Leaving unexpected entry {:?} in {:?}", name, root);
            report.skipped_entries.push(name);
        }
    }
    info!(
        "Cleared {} shard directories under {:?}",
        report.removed_shards, root
    );
    Ok(report)
}
