use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QuireError;

/// One of the two independently migrated databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Embedded single-file database for solo use.
    Local,
    /// Networked relational database backing shared workspaces.
    Shared,
}

impl TargetKind {
    pub const ALL: [TargetKind; 2] = [TargetKind::Local, TargetKind::Shared];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Shared => "shared",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = QuireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "shared" => Ok(Self::Shared),
            other => Err(QuireError::InvalidArgument(format!(
                "Unknown database target '{}' (expected 'local' or 'shared')",
                other
            ))),
        }
    }
}
