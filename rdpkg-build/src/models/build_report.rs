//! Build phases and the summary of one run

use crate::services::cvap::CvapLevelOutcome;
use crate::services::package_writer::LayerWriteOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Pipeline phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildPhase {
    /// PL, TIGER and CVAP archives
    Downloading,
    /// PL header and segments merged
    Tabulating,
    /// One layer per geography
    WritingLayers,
    Cvap,
    VoterFile,
    Equivalency,
    Completed,
    Cancelled,
    Failed,
}

impl BuildPhase {
    /// Overall progress range `[from, to]` covered by the phase
    pub fn progress_range(&self) -> (f64, f64) {
        match self {
            BuildPhase::Downloading => (0.0, 20.0),
            BuildPhase::Tabulating => (20.0, 30.0),
            BuildPhase::WritingLayers => (30.0, 70.0),
            BuildPhase::Cvap => (70.0, 85.0),
            BuildPhase::VoterFile => (85.0, 92.0),
            BuildPhase::Equivalency => (92.0, 100.0),
            BuildPhase::Completed | BuildPhase::Cancelled | BuildPhase::Failed => (100.0, 100.0),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildPhase::Completed | BuildPhase::Cancelled | BuildPhase::Failed)
    }
}

/// What a build did
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub state: String,
    pub year: String,
    pub package: PathBuf,
    pub phase: BuildPhase,
    pub layers: Vec<LayerWriteOutcome>,
    pub cvap: Vec<CvapLevelOutcome>,
    pub voter_file_imported: bool,
    pub equivalency_imported: usize,
    /// Non-fatal problems, one line each
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl BuildReport {
    pub fn new(state: &str, year: &str, package: PathBuf) -> Self {
        Self {
            state: state.to_string(),
            year: year.to_string(),
            package,
            phase: BuildPhase::Downloading,
            layers: Vec::new(),
            cvap: Vec::new(),
            voter_file_imported: false,
            equivalency_imported: 0,
            warnings: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `phase`, stamping the end time for terminal phases
    pub fn transition_to(&mut self, phase: BuildPhase) {
        self.phase = phase;
        if phase.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn failed_layers(&self) -> impl Iterator<Item = &LayerWriteOutcome> {
        self.layers.iter().filter(|l| !l.success)
    }
}
