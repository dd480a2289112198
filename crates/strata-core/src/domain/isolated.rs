//! Per-change-request isolated namespaces.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

fn revision_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-f]{7,40}$").expect("static regex"))
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^PR_([1-9][0-9]*)__([0-9a-f]{7,40})$").expect("static regex"))
}

/// Identifies the CI-only namespace of one change request at one revision.
///
/// The identifier is derived, never searched for: creation and teardown both
/// go through [`IsolatedNamespace::derive`], so they always agree on the name
/// and two different change requests can never share a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IsolatedNamespace {
    change_request: u64,
    revision: String,
}

impl IsolatedNamespace {
    /// Derive the handle for change request `change_request` at `revision`.
    ///
    /// The revision is lower-cased and must be 7-40 hex characters.
    pub fn derive(
        change_request: u64,
        revision: &str,
    ) -> std::result::Result<Self, ConfigError> {
        if change_request == 0 {
            return Err(ConfigError::InvalidIsolatedNamespace(
                "change request number must be positive".to_string(),
            ));
        }
        let revision = revision.trim().to_ascii_lowercase();
        if !revision_pattern().is_match(&revision) {
            return Err(ConfigError::InvalidIsolatedNamespace(format!(
                "revision '{revision}' is not a 7-40 character hex revision"
            )));
        }
        Ok(Self {
            change_request,
            revision,
        })
    }

    /// Parse an identifier previously produced by [`IsolatedNamespace::id`].
    pub fn parse(id: &str) -> std::result::Result<Self, ConfigError> {
        let caps = id_pattern()
            .captures(id)
            .ok_or_else(|| ConfigError::InvalidIsolatedNamespace(id.to_string()))?;
        let change_request = caps[1]
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidIsolatedNamespace(id.to_string()))?;
        Self::derive(change_request, &caps[2])
    }

    pub fn change_request(&self) -> u64 {
        self.change_request
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// `PR_<changeRequestNumber>__<shortRevision>`
    pub fn id(&self) -> String {
        format!("PR_{}__{}", self.change_request, self.revision)
    }
}

impl fmt::Display for IsolatedNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}
