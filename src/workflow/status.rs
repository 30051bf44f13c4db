use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of an application. Cancellation is a row removal, not a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Pending,
    TrialScheduled,
    GradedPassed,
    GradedFailed,
    DocsPending,
    DocsSubmitted,
    Hired,
    Rejected,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 8] = [
        ApplicationStatus::Pending,
        ApplicationStatus::TrialScheduled,
        ApplicationStatus::GradedPassed,
        ApplicationStatus::GradedFailed,
        ApplicationStatus::DocsPending,
        ApplicationStatus::DocsSubmitted,
        ApplicationStatus::Hired,
        ApplicationStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "PENDING",
            ApplicationStatus::TrialScheduled => "TRIAL_SCHEDULED",
            ApplicationStatus::GradedPassed => "GRADED_PASSED",
            ApplicationStatus::GradedFailed => "GRADED_FAILED",
            ApplicationStatus::DocsPending => "DOCS_PENDING",
            ApplicationStatus::DocsSubmitted => "DOCS_SUBMITTED",
            ApplicationStatus::Hired => "HIRED",
            ApplicationStatus::Rejected => "REJECTED",
        }
    }

    /// Human readable label used in notifications.
    pub fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending review",
            ApplicationStatus::TrialScheduled => "trial lesson scheduled",
            ApplicationStatus::GradedPassed => "trial lesson passed",
            ApplicationStatus::GradedFailed => "trial lesson not passed",
            ApplicationStatus::DocsPending => "awaiting documents",
            ApplicationStatus::DocsSubmitted => "documents submitted",
            ApplicationStatus::Hired => "hired",
            ApplicationStatus::Rejected => "not selected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ApplicationStatus::Hired | ApplicationStatus::Rejected)
    }

    /// The documented transition graph. Rescheduling a trial and uploading
    /// further documents are self-loops.
    pub fn successors(self) -> &'static [ApplicationStatus] {
        use ApplicationStatus::*;
        match self {
            Pending => &[TrialScheduled, Rejected],
            TrialScheduled => &[TrialScheduled, GradedPassed, GradedFailed, Rejected],
            GradedPassed => &[DocsPending, Rejected],
            GradedFailed => &[Rejected],
            DocsPending => &[DocsSubmitted, Rejected],
            DocsSubmitted => &[DocsSubmitted, Hired, Rejected],
            Hired => &[],
            Rejected => &[],
        }
    }

    pub fn can_transition_to(self, next: ApplicationStatus) -> bool {
        self.successors().contains(&next)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for ApplicationStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}

/// Sub-state of the sensitive document request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocsStatus {
    Pending,
    Submitted,
}

impl DocsStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocsStatus::Pending => "PENDING",
            DocsStatus::Submitted => "SUBMITTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Draft,
    Published,
    Closed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::Published => "published",
            JobStatus::Closed => "closed",
        }
    }

    pub fn accepts_applications(self) -> bool {
        matches!(self, JobStatus::Published)
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(JobStatus::Draft),
            // "open" is the older spelling of a published posting.
            "published" | "open" => Ok(JobStatus::Published),
            "closed" => Ok(JobStatus::Closed),
            _ => Err(UnknownStatus(value.to_string())),
        }
    }
}
