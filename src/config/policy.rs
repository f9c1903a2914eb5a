//! Job policy loaded from TOML.
//!
//! Every section and key is optional; an absent file means defaults that
//! match how the bot has always run.

use crate::cluster::{ExclusionPolicy, SubjectNormalizer};
use crate::error::{Error, Result};
use crate::resolver::ReverseMatch;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub merge: MergePolicy,
    pub propagation: PropagationPolicy,
    pub users: UserMergePolicy,
}

/// Duplicate-ticket merge pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergePolicy {
    pub excluded_channels: BTreeSet<String>,
    pub excluded_org_domains: BTreeSet<String>,
    /// How far back the candidate search reaches.
    pub lookback_hours: u32,
    pub subject_normalizer: SubjectNormalizer,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            excluded_channels: ["whatsapp", "any_channel"]
                .into_iter()
                .map(String::from)
                .collect(),
            excluded_org_domains: BTreeSet::new(),
            lookback_hours: 24,
            subject_normalizer: SubjectNormalizer::Basic,
        }
    }
}

impl MergePolicy {
    pub fn exclusions(&self) -> ExclusionPolicy {
        ExclusionPolicy {
            channels: self.excluded_channels.iter().map(|c| c.to_lowercase()).collect(),
            org_domains: self
                .excluded_org_domains
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
        }
    }
}

/// Where the missing-value notice is posted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeTarget {
    /// The child that could not receive the value.
    #[default]
    Child,
    /// The parent that lacks the value.
    Parent,
}

/// Escalation-reason propagation pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PropagationPolicy {
    /// Saved view listing the child tickets to process.
    pub view_id: Option<u64>,
    /// Custom field carrying the escalation reason.
    pub field_id: Option<u64>,
    pub reverse_search_days: u32,
    pub reverse_match: ReverseMatch,
    pub notice_target: NoticeTarget,
}

impl Default for PropagationPolicy {
    fn default() -> Self {
        Self {
            view_id: None,
            field_id: None,
            reverse_search_days: 90,
            reverse_match: ReverseMatch::Earliest,
            notice_target: NoticeTarget::Child,
        }
    }
}

/// Duplicate-user merge pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserMergePolicy {
    /// Solved-ticket window that selects the requesters to examine.
    pub window_minutes: u32,
}

impl Default for UserMergePolicy {
    fn default() -> Self {
        Self { window_minutes: 60 }
    }
}

impl Policy {
    /// Parse a policy document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("bad policy: {e}")))
    }

    /// Load a policy file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read policy file {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad policy file {}: {e}", path.display())))
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
