use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serial::{ReadOutcome, Weight};

/// Result of probing a single candidate port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The port answered with a usable reading and became the active scale.
    Detected {
        weight: Weight,
        outcome: Option<ReadOutcome>,
    },
    /// The port could not be opened.
    OpenFailed { error: String },
    /// The port opened but the read returned a failure sentinel.
    ReadFailed {
        weight: Weight,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub port_name: String,
    pub outcome: ProbeOutcome,
    pub probed_at: DateTime<Utc>,
}

impl ProbeRecord {
    pub fn new(port_name: String, outcome: ProbeOutcome) -> Self {
        Self {
            port_name,
            outcome,
            probed_at: Utc::now(),
        }
    }

    pub fn is_detected(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Detected { .. })
    }
}

/// Summary of one detection run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    pub port_name: Option<String>,
    pub probes: Vec<ProbeRecord>,
    pub finished_at: DateTime<Utc>,
}

impl DetectionReport {
    pub fn found(port_name: String, probes: Vec<ProbeRecord>) -> Self {
        Self {
            port_name: Some(port_name),
            probes,
            finished_at: Utc::now(),
        }
    }

    pub fn not_found(probes: Vec<ProbeRecord>) -> Self {
        Self {
            port_name: None,
            probes,
            finished_at: Utc::now(),
        }
    }

    pub fn is_found(&self) -> bool {
        self.port_name.is_some()
    }

    /// Probes that did not lead to a scale, with their skip reasons.
    pub fn skipped(&self) -> impl Iterator<Item = &ProbeRecord> {
        self.probes.iter().filter(|p| !p.is_detected())
    }
}
