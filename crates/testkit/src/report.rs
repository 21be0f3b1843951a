//! JSON summary of a headless session run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    /// Both sides converged.
    Pass,
    /// The sides diverged or the session failed.
    Fail,
}

/// Summary printed by the headless driver and written next to the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    /// Scenario identifier.
    pub scenario: String,
    /// When the run finished (RFC 3339).
    pub timestamp: String,
    /// Overall result.
    pub result: TestResult,
    /// Ticks driven.
    pub ticks: u64,
    /// Replicated objects in the tree at the end.
    pub replicated_objects: usize,
    /// Entries in the session's object map at the end.
    pub mapped_objects: usize,
    /// Host notifications forwarded to the session.
    pub host_events: usize,
    /// Remote operations issued by the scripted participant.
    pub remote_operations: usize,
    /// Notices surfaced to the user.
    pub notices: Vec<String>,
    /// Reason the run failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl SessionReport {
    /// Empty report stamped with the current time.
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            result: TestResult::Pass,
            ticks: 0,
            replicated_objects: 0,
            mapped_objects: 0,
            host_events: 0,
            remote_operations: 0,
            notices: Vec::new(),
            failure: None,
        }
    }

    /// Record a failure.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.result = TestResult::Fail;
        self.failure = Some(reason.into());
    }

    /// Pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Persist as pretty JSON, creating parent directories if needed.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        file.write_all(self.to_json()?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_is_serialized_only_when_present() {
        let mut report = SessionReport::new("smoke");
        let json = report.to_json().unwrap();
        assert!(json.contains("\"result\": \"pass\""));
        assert!(!json.contains("failure"));

        report.fail("diverged");
        let parsed: SessionReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed.result, TestResult::Fail);
        assert_eq!(parsed.failure.as_deref(), Some("diverged"));
    }
}
