//! The restricted/public split.
//!
//! Every storage, upload and download component is constructed for exactly
//! one partition, and every catalog query issued on its behalf is bound to
//! that partition's `restricted` flag.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Public,
    Restricted,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Public, Partition::Restricted];

    pub fn is_restricted(&self) -> bool {
        matches!(self, Partition::Restricted)
    }

    pub fn from_restricted(restricted: bool) -> Self {
        if restricted {
            Partition::Restricted
        } else {
            Partition::Public
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Public => "public",
            Partition::Restricted => "restricted",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
