use crate::types::validation::ValidationError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Hazard severity, ordered `Advisory < Watch < Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Advisory,
    Watch,
    Warning,
}

impl Severity {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(Self::Advisory),
            "watch" => Ok(Self::Watch),
            "warning" => Ok(Self::Warning),
            _ => Err(ValidationError::InvalidSeverity(raw.trim().to_string())),
        }
    }

    /// Maps feed labels onto our three levels. Accepts both our own labels and
    /// the CAP severities (`minor`, `moderate`, `severe`, `extreme`) used by
    /// national weather services. Unknown labels rank lowest.
    pub fn from_upstream_label(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "watch" | "moderate" => Self::Watch,
            "warning" | "severe" | "extreme" => Self::Warning,
            _ => Self::Advisory,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Advisory => "advisory",
            Self::Watch => "watch",
            Self::Warning => "warning",
        }
    }
}

/// One active entry of the upstream hazard feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hazard {
    pub id: String,
    pub severity: Severity,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertWatch {
    pub owner: String,
    pub location: String,
    pub min_severity: Severity,
    pub enabled: bool,
    pub seen_alert_ids: BTreeSet<String>,
}

impl AlertWatch {
    /// Whether this watcher still has to be told about `hazard`.
    pub fn wants(&self, hazard: &Hazard) -> bool {
        self.enabled
            && hazard.severity >= self.min_severity
            && !self.seen_alert_ids.contains(&hazard.id)
    }
}
