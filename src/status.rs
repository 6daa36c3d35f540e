use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Application-facing lifecycle state of a stack.
///
/// Always derived from the latest raw lifecycle code of the stack service;
/// never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    New,
    Creating,
    Running,
    Updating,
    Deleting,
    Rollback,
    Failed,
    Unknown,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Rollback => "rollback",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// The stack service is actively changing the stack.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Updating | Self::Deleting | Self::Rollback
        )
    }

    /// Stable until someone submits a new request. `Unknown` is never settled.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::New | Self::Running | Self::Failed)
    }

    /// Whether the stack service can report `self` right after `prev`.
    /// Informational only; nothing rejects an unexpected transition.
    pub fn can_follow(&self, prev: ApplicationStatus) -> bool {
        use ApplicationStatus::*;

        if *self == prev || *self == Unknown || prev == Unknown {
            return true;
        }
        match prev {
            New => matches!(self, Creating),
            Creating => matches!(self, Running | Failed | Rollback),
            Running => matches!(self, Updating | Deleting),
            Updating => matches!(self, Running | Rollback),
            Deleting => matches!(self, Running),
            Rollback => matches!(self, Failed),
            Failed => matches!(self, Updating | Deleting),
            Unknown => true,
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const STATUS_TABLE: [(&str, ApplicationStatus); 12] = [
    ("", ApplicationStatus::New),
    ("CREATE_IN_PROGRESS", ApplicationStatus::Creating),
    ("CREATE_COMPLETE", ApplicationStatus::Running),
    ("DELETE_FAILED", ApplicationStatus::Running),
    ("DELETE_IN_PROGRESS", ApplicationStatus::Deleting),
    ("ROLLBACK_IN_PROGRESS", ApplicationStatus::Rollback),
    ("ROLLBACK_COMPLETE", ApplicationStatus::Failed),
    ("UPDATE_IN_PROGRESS", ApplicationStatus::Updating),
    (
        "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
        ApplicationStatus::Updating,
    ),
    ("UPDATE_COMPLETE", ApplicationStatus::Running),
    ("UPDATE_ROLLBACK_IN_PROGRESS", ApplicationStatus::Rollback),
    ("UPDATE_ROLLBACK_COMPLETE", ApplicationStatus::Failed),
];

/// Looks up a raw lifecycle code. `None` for codes outside the table.
pub fn lookup(raw: &str) -> Option<ApplicationStatus> {
    STATUS_TABLE
        .iter()
        .find(|(code, _)| *code == raw)
        .map(|(_, status)| *status)
}

/// Severity of the event emitted for an unrecognized lifecycle code.
#[derive(
    clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum UnknownStatusLevel {
    Off,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusNormalizer {
    unknown_level: UnknownStatusLevel,
}

impl StatusNormalizer {
    pub fn new(unknown_level: UnknownStatusLevel) -> Self {
        Self { unknown_level }
    }

    /// Total mapping from raw code to status; unrecognized codes become
    /// `Unknown` and are reported, never returned as errors.
    pub fn normalize(&self, raw: &str) -> ApplicationStatus {
        match lookup(raw) {
            Some(status) => status,
            None => {
                self.report_unknown(raw);
                ApplicationStatus::Unknown
            }
        }
    }

    fn report_unknown(&self, raw: &str) {
        match self.unknown_level {
            UnknownStatusLevel::Off => {}
            UnknownStatusLevel::Debug => debug!(raw_status = %raw, "unknown stack status"),
            UnknownStatusLevel::Info => info!(raw_status = %raw, "unknown stack status"),
            UnknownStatusLevel::Warn => warn!(raw_status = %raw, "unknown stack status"),
            UnknownStatusLevel::Error => error!(raw_status = %raw, "unknown stack status"),
        }
    }
}
