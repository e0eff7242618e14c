//! The fixed step sequence
//!
//! Every run walks the same linear sequence. `gate1` sits between `script`
//! and `assets`, `gate2` between `timeline` and `render_upload`.

use crate::GateName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named step in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    /// Source discovery (scraping, trend lookup)
    Discovery,
    /// Script generation
    Script,
    /// Image/asset generation
    Assets,
    /// Voice synthesis
    Voice,
    /// Editing timeline build
    Timeline,
    /// Final render and upload
    RenderUpload,
}

impl StepName {
    /// All steps in execution order
    pub const ALL: [StepName; 6] = [
        StepName::Discovery,
        StepName::Script,
        StepName::Assets,
        StepName::Voice,
        StepName::Timeline,
        StepName::RenderUpload,
    ];

    pub fn ordinal(self) -> u8 {
        match self {
            StepName::Discovery => 0,
            StepName::Script => 1,
            StepName::Assets => 2,
            StepName::Voice => 3,
            StepName::Timeline => 4,
            StepName::RenderUpload => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepName::Discovery => "discovery",
            StepName::Script => "script",
            StepName::Assets => "assets",
            StepName::Voice => "voice",
            StepName::Timeline => "timeline",
            StepName::RenderUpload => "render_upload",
        }
    }

    /// Steps that spend paid credits (image generation, TTS, render minutes).
    /// These are refused at `CRITICAL` and `PAUSED` tiers.
    pub fn is_expensive(self) -> bool {
        matches!(
            self,
            StepName::Assets | StepName::Voice | StepName::RenderUpload
        )
    }

    /// Artifact path, relative to the run directory, that the step produces
    pub fn artifact(self) -> &'static str {
        match self {
            StepName::Discovery => "discovery.json",
            StepName::Script => "script.md",
            StepName::Assets => "assets/manifest.json",
            StepName::Voice => "voice/manifest.json",
            StepName::Timeline => "timeline.json",
            StepName::RenderUpload => "upload.json",
        }
    }

    pub fn next(self) -> Option<StepName> {
        StepName::ALL.get(self.ordinal() as usize + 1).copied()
    }

    /// Steps strictly before this one
    pub fn predecessors(self) -> &'static [StepName] {
        &StepName::ALL[..self.ordinal() as usize]
    }

    /// The gate that must be APPROVED before this step may run
    pub fn guarded_by(self) -> Option<GateName> {
        GateName::ALL
            .into_iter()
            .find(|gate| gate.following_step() == self)
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepName::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown step '{}'", s))
    }
}

/// Position of a run in the sequence: the next step to run, or complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Script,
    Assets,
    Voice,
    Timeline,
    RenderUpload,
    Complete,
}

impl Stage {
    pub fn step(self) -> Option<StepName> {
        match self {
            Stage::Discovery => Some(StepName::Discovery),
            Stage::Script => Some(StepName::Script),
            Stage::Assets => Some(StepName::Assets),
            Stage::Voice => Some(StepName::Voice),
            Stage::Timeline => Some(StepName::Timeline),
            Stage::RenderUpload => Some(StepName::RenderUpload),
            Stage::Complete => None,
        }
    }

    /// Ordinal used for ordering; `Complete` sorts after every step
    pub fn ordinal(self) -> u8 {
        self.step().map(StepName::ordinal).unwrap_or(StepName::ALL.len() as u8)
    }

    /// The stage that follows a finished step
    pub fn after(step: StepName) -> Stage {
        step.next().map(Stage::from).unwrap_or(Stage::Complete)
    }
}

impl From<StepName> for Stage {
    fn from(step: StepName) -> Self {
        match step {
            StepName::Discovery => Stage::Discovery,
            StepName::Script => Stage::Script,
            StepName::Assets => Stage::Assets,
            StepName::Voice => Stage::Voice,
            StepName::Timeline => Stage::Timeline,
            StepName::RenderUpload => Stage::RenderUpload,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step() {
            Some(step) => f.write_str(step.as_str()),
            None => f.write_str("complete"),
        }
    }
}

/// Status of one step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_follow_sequence() {
        for (index, step) in StepName::ALL.iter().enumerate() {
            assert_eq!(step.ordinal() as usize, index);
        }
        assert_eq!(StepName::Timeline.next(), Some(StepName::RenderUpload));
        assert_eq!(StepName::RenderUpload.next(), None);
    }

    #[test]
    fn gates_guard_expected_steps() {
        assert_eq!(StepName::Assets.guarded_by(), Some(GateName::Gate1));
        assert_eq!(StepName::RenderUpload.guarded_by(), Some(GateName::Gate2));
        assert_eq!(StepName::Voice.guarded_by(), None);
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::RenderUpload).unwrap();
        assert_eq!(json, "\"render_upload\"");
        assert_eq!(Stage::after(StepName::RenderUpload), Stage::Complete);
        assert_eq!(Stage::Complete.to_string(), "complete");
    }

    #[test]
    fn parse_step_names() {
        assert_eq!("voice".parse::<StepName>().unwrap(), StepName::Voice);
        assert!("upload".parse::<StepName>().is_err());
    }
}
