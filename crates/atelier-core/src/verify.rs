//! Verification
//!
//! Optional quality gates that run against the primary artifact after
//! the plan resolves. Reports aggregate pessimistically: one failing
//! verifier fails the run, one needs-review verifier freezes it for
//! human review.

use atelier_artifact::Artifact;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verification outcome, ordered worst-last
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    /// No issues found
    Pass,
    /// Issues a human should look at
    NeedsReview,
    /// The artifact is not acceptable
    Fail,
}

impl VerificationStatus {
    /// The worse of two statuses
    #[inline]
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

/// One issue raised by a verifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationIssue {
    /// Issue description
    pub message: String,
    /// Affected document section, when section-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl VerificationIssue {
    /// An artifact-wide issue
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            section: None,
        }
    }

    /// A section-scoped issue
    #[must_use]
    pub fn in_section(message: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            section: Some(section.into()),
        }
    }
}

/// A verifier's report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Overall status
    pub status: VerificationStatus,
    /// Raised issues
    #[serde(default)]
    pub issues: Vec<VerificationIssue>,
    /// Verifier metadata
    #[serde(default)]
    pub metadata: Value,
}

impl VerificationReport {
    /// A clean passing report
    #[must_use]
    pub fn pass() -> Self {
        Self {
            status: VerificationStatus::Pass,
            issues: Vec::new(),
            metadata: Value::Null,
        }
    }

    /// A report with a status and issues
    #[must_use]
    pub fn with_issues(status: VerificationStatus, issues: Vec<VerificationIssue>) -> Self {
        Self {
            status,
            issues,
            metadata: Value::Null,
        }
    }
}

/// Verifier errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The verifier could not produce a report
    #[error("verification failed to run: {0}")]
    Failed(String),
}

/// Quality gate over a produced artifact
#[async_trait::async_trait]
pub trait Verifier: Send + Sync {
    /// Verifier name, used in events and report metadata
    fn name(&self) -> &str;

    /// Examine an artifact
    async fn verify(&self, artifact: &Artifact) -> Result<VerificationReport, VerifyError>;
}

/// Merge reports pessimistically
///
/// The aggregate status is the worst individual status; issues are
/// concatenated in report order. No reports means a clean pass.
#[must_use]
pub fn aggregate(reports: Vec<VerificationReport>) -> VerificationReport {
    let mut status = VerificationStatus::Pass;
    let mut issues = Vec::new();
    for report in reports {
        status = status.worst(report.status);
        issues.extend(report.issues);
    }
    VerificationReport {
        status,
        issues,
        metadata: Value::Null,
    }
}
