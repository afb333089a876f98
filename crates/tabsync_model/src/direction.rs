//! Sync direction for one pass.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side is source vs. destination for one sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Remote service is the source of truth; local store is written.
    RemoteToLocal,
    /// Local store is the source of truth; remote service is written.
    LocalToRemote,
    /// Remote-to-local pass followed by local-to-remote; remote wins
    /// conflicts by default.
    Bidirectional,
}

impl SyncDirection {
    /// Returns the stable string form used in persisted state keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::RemoteToLocal => "remote_to_local",
            SyncDirection::LocalToRemote => "local_to_remote",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote_to_local" => Ok(SyncDirection::RemoteToLocal),
            "local_to_remote" => Ok(SyncDirection::LocalToRemote),
            "bidirectional" => Ok(SyncDirection::Bidirectional),
            other => Err(format!("unknown sync direction: {other}")),
        }
    }
}
