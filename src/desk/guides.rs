//! Troubleshooting guide catalogue and selection.
//!
//! Guides are markdown files named `<guide>.md` under the configured guides
//! directory. Selection asks the reasoning backend to name one guide for an
//! issue description; anything that is not exactly one of the known ids
//! falls back to [`GuideId::DEFAULT`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::reasoning::Sampler;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GuideId {
    RoboticArm,
    GrinderMotor,
    FacialRecognition,
    BoilerTemperature,
    MilkFrother,
    BeanHopper,
}

impl GuideId {
    pub const ALL: [GuideId; 6] = [
        GuideId::RoboticArm,
        GuideId::GrinderMotor,
        GuideId::FacialRecognition,
        GuideId::BoilerTemperature,
        GuideId::MilkFrother,
        GuideId::BeanHopper,
    ];

    pub const DEFAULT: GuideId = GuideId::RoboticArm;

    pub fn as_str(&self) -> &'static str {
        match self {
            GuideId::RoboticArm => "robotic_arm",
            GuideId::GrinderMotor => "grinder_motor",
            GuideId::FacialRecognition => "facial_recognition",
            GuideId::BoilerTemperature => "boiler_temperature",
            GuideId::MilkFrother => "milk_frother",
            GuideId::BeanHopper => "bean_hopper",
        }
    }

    /// One-line description of what the guide covers, shown to the model.
    pub fn scope(&self) -> &'static str {
        match self {
            GuideId::RoboticArm => {
                "For robotic arm issues, error codes E003, servo problems, movement failures"
            }
            GuideId::GrinderMotor => {
                "For grinder motor overcurrent, grinding issues, burr problems"
            }
            GuideId::FacialRecognition => {
                "For customer recognition failures, camera issues, identification problems"
            }
            GuideId::BoilerTemperature => {
                "For water temperature issues, heating problems, thermal control"
            }
            GuideId::MilkFrother => {
                "For milk frothing issues, steam wand problems, foam quality"
            }
            GuideId::BeanHopper => {
                "For bean hopper sensor issues, level detection, insufficient beans errors"
            }
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.md", self.as_str())
    }

    /// Strict interpretation of a model reply: trimmed, lowercased, and then
    /// an exact id match. No fuzzy or substring matching.
    pub fn parse_response(reply: &str) -> Option<GuideId> {
        reply.parse().ok()
    }
}

impl fmt::Display for GuideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GuideId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        GuideId::ALL
            .into_iter()
            .find(|g| g.as_str() == key)
            .ok_or_else(|| format!("Unknown guide: {}", s.trim()))
    }
}

/// Reads guide markdown from disk.
#[derive(Debug, Clone)]
pub struct GuideLibrary {
    dir: PathBuf,
}

impl GuideLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load a guide's markdown. Never fails: a missing file or a read error
    /// comes back as a human-readable message in place of the content.
    pub async fn load(&self, guide: GuideId) -> String {
        let path = self.dir.join(guide.file_name());
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "troubleshooting guide missing");
                format!("Guide not found: {}", guide.file_name())
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read troubleshooting guide");
                format!("Error loading guide {}: {}", guide, e)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GuideSelection {
    pub guide_name: GuideId,
    pub content: String,
    pub selection_reason: String,
    /// True when the default was used because the model reply was unusable.
    pub defaulted: bool,
}

#[derive(Clone)]
pub struct GuideSelector {
    sampler: Arc<dyn Sampler>,
    library: GuideLibrary,
    timeout: Duration,
}

impl GuideSelector {
    pub fn new(sampler: Arc<dyn Sampler>, library: GuideLibrary, timeout: Duration) -> Self {
        Self {
            sampler,
            library,
            timeout,
        }
    }

    pub fn library(&self) -> &GuideLibrary {
        &self.library
    }

    pub fn build_prompt(issue: &str) -> String {
        let guides: Vec<String> = GuideId::ALL
            .iter()
            .map(|g| format!("- {} - {}", g, g.scope()))
            .collect();
        format!(
            "Issue: {}\n\nAvailable troubleshooting guides:\n{}\n\n\
             Select the most relevant guide by responding with ONLY the guide name (e.g., \"robotic_arm\"):",
            issue,
            guides.join("\n")
        )
    }

    /// Ask the model for a guide id. Returns the id and whether the default
    /// had to be used.
    pub async fn choose(&self, issue: &str) -> (GuideId, bool) {
        let prompt = Self::build_prompt(issue);
        let reply = tokio::time::timeout(self.timeout, self.sampler.sample("", &prompt)).await;
        match reply {
            Ok(Ok(text)) => match GuideId::parse_response(&text) {
                Some(guide) => (guide, false),
                None => {
                    tracing::warn!(reply = %text.trim(), "model named an unknown guide, using default");
                    (GuideId::DEFAULT, true)
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "guide selection failed, using default");
                (GuideId::DEFAULT, true)
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "guide selection timed out, using default");
                (GuideId::DEFAULT, true)
            }
        }
    }

    pub async fn select(&self, issue: &str) -> GuideSelection {
        let (guide, defaulted) = self.choose(issue).await;
        let content = self.library.load(guide).await;
        tracing::info!(guide = %guide, defaulted, "troubleshooting guide selected");
        GuideSelection {
            guide_name: guide,
            content,
            selection_reason: format!(
                "AI-selected {} troubleshooting guide based on issue: {}",
                guide.as_str().replace('_', " "),
                issue
            ),
            defaulted,
        }
    }
}
