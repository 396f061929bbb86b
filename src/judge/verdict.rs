//! Closed verdict and submission-status enumerations.
//!
//! Every classification site matches on these exhaustively, and the stored
//! string forms round-trip through [`FromStr`], so an unrecognised status
//! can never reach persistence.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status string that names no known verdict or status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown status '{0}'")]
pub struct UnknownStatus(pub String);

/// Outcome of judging one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    InternalError,
}

impl Verdict {
    /// All verdicts.
    pub const ALL: [Verdict; 7] = [
        Verdict::Accepted,
        Verdict::WrongAnswer,
        Verdict::TimeLimitExceeded,
        Verdict::MemoryLimitExceeded,
        Verdict::RuntimeError,
        Verdict::CompileError,
        Verdict::InternalError,
    ];

    /// Stable string form used in storage and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::WrongAnswer => "wrong_answer",
            Verdict::TimeLimitExceeded => "time_limit_exceeded",
            Verdict::MemoryLimitExceeded => "memory_limit_exceeded",
            Verdict::RuntimeError => "runtime_error",
            Verdict::CompileError => "compile_error",
            Verdict::InternalError => "internal_error",
        }
    }

    /// Short conventional abbreviation (AC, WA, ...).
    pub fn short(&self) -> &'static str {
        match self {
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::RuntimeError => "RE",
            Verdict::CompileError => "CE",
            Verdict::InternalError => "IE",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    /// Whether the program actually ran to a judged end, so its timing counts.
    pub fn executed(&self) -> bool {
        !matches!(self, Verdict::CompileError | Verdict::InternalError)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verdict::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Lifecycle status of a submission.
///
/// `Pending` and `Running` are transient; every other variant is terminal
/// and mirrors the [`Verdict`] that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    InternalError,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Accepted => Verdict::Accepted.as_str(),
            SubmissionStatus::WrongAnswer => Verdict::WrongAnswer.as_str(),
            SubmissionStatus::TimeLimitExceeded => Verdict::TimeLimitExceeded.as_str(),
            SubmissionStatus::MemoryLimitExceeded => Verdict::MemoryLimitExceeded.as_str(),
            SubmissionStatus::RuntimeError => Verdict::RuntimeError.as_str(),
            SubmissionStatus::CompileError => Verdict::CompileError.as_str(),
            SubmissionStatus::InternalError => Verdict::InternalError.as_str(),
        }
    }

    /// Whether judging has finished.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending | SubmissionStatus::Running)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionStatus::Accepted)
    }

    /// The deciding verdict of a terminal status.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            SubmissionStatus::Pending | SubmissionStatus::Running => None,
            SubmissionStatus::Accepted => Some(Verdict::Accepted),
            SubmissionStatus::WrongAnswer => Some(Verdict::WrongAnswer),
            SubmissionStatus::TimeLimitExceeded => Some(Verdict::TimeLimitExceeded),
            SubmissionStatus::MemoryLimitExceeded => Some(Verdict::MemoryLimitExceeded),
            SubmissionStatus::RuntimeError => Some(Verdict::RuntimeError),
            SubmissionStatus::CompileError => Some(Verdict::CompileError),
            SubmissionStatus::InternalError => Some(Verdict::InternalError),
        }
    }
}

impl From<Verdict> for SubmissionStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accepted => SubmissionStatus::Accepted,
            Verdict::WrongAnswer => SubmissionStatus::WrongAnswer,
            Verdict::TimeLimitExceeded => SubmissionStatus::TimeLimitExceeded,
            Verdict::MemoryLimitExceeded => SubmissionStatus::MemoryLimitExceeded,
            Verdict::RuntimeError => SubmissionStatus::RuntimeError,
            Verdict::CompileError => SubmissionStatus::CompileError,
            Verdict::InternalError => SubmissionStatus::InternalError,
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "running" => Ok(SubmissionStatus::Running),
            other => other.parse::<Verdict>().map(SubmissionStatus::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_string_round_trip() {
        for verdict in Verdict::ALL {
            assert_eq!(verdict.as_str().parse::<Verdict>().unwrap(), verdict);
            let status = SubmissionStatus::from(verdict);
            assert_eq!(status.as_str().parse::<SubmissionStatus>().unwrap(), status);
            assert_eq!(status.verdict(), Some(verdict));
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert_eq!(
            "ACCEPTED".parse::<Verdict>().unwrap_err(),
            UnknownStatus("ACCEPTED".to_string())
        );
        assert!("done".parse::<SubmissionStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SubmissionStatus::Pending.is_terminal());
        assert!(!SubmissionStatus::Running.is_terminal());
        assert!(SubmissionStatus::CompileError.is_terminal());
        assert!(SubmissionStatus::Accepted.is_accepted());
        assert_eq!(SubmissionStatus::Running.verdict(), None);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Verdict::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"time_limit_exceeded\"");
        let status: SubmissionStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(status, SubmissionStatus::Running);
    }

    #[test]
    fn test_executed() {
        assert!(Verdict::WrongAnswer.executed());
        assert!(Verdict::TimeLimitExceeded.executed());
        assert!(!Verdict::CompileError.executed());
        assert!(!Verdict::InternalError.executed());
    }
}
