//! Node module

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one running orchestrator replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub hostname: String,
}

impl NodeInfo {
    /// Identity for the current process: hostname plus a random suffix
    pub fn local() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        Self {
            id: format!("{}-{}", hostname, Uuid::new_v4().simple()),
            hostname,
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            hostname: id.clone(),
            id,
        }
    }
}
