//! Request status and priority vocabulary, plus the status transition table.
//!
//! Statuses are persisted and serialized with the labels the web client
//! already understands (`"Soumise"`, `"En cours d'examen"`, ...). The free-form
//! `PUT /api/requests/:id` path writes any status verbatim; only
//! `POST /api/requests/:id/status` goes through [`ensure_transition`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    #[serde(rename = "Soumise")]
    Submitted,
    #[serde(rename = "En cours d'examen")]
    UnderReview,
    #[serde(rename = "Informations requises")]
    InfoRequested,
    #[serde(rename = "En traitement")]
    InProgress,
    #[serde(rename = "Validée")]
    Validated,
    #[serde(rename = "Terminée")]
    Completed,
    #[serde(rename = "Rejetée")]
    Rejected,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 7] = [
        RequestStatus::Submitted,
        RequestStatus::UnderReview,
        RequestStatus::InfoRequested,
        RequestStatus::InProgress,
        RequestStatus::Validated,
        RequestStatus::Completed,
        RequestStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Submitted => "Soumise",
            RequestStatus::UnderReview => "En cours d'examen",
            RequestStatus::InfoRequested => "Informations requises",
            RequestStatus::InProgress => "En traitement",
            RequestStatus::Validated => "Validée",
            RequestStatus::Completed => "Terminée",
            RequestStatus::Rejected => "Rejetée",
        }
    }

    /// Short machine key, as used by client-side filters.
    pub fn key(self) -> &'static str {
        match self {
            RequestStatus::Submitted => "submitted",
            RequestStatus::UnderReview => "in_review",
            RequestStatus::InfoRequested => "info_required",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Validated => "validated",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Rejected)
    }

    pub fn successors(self) -> &'static [RequestStatus] {
        use RequestStatus::*;
        match self {
            Submitted => &[UnderReview, Rejected],
            UnderReview => &[InfoRequested, InProgress, Rejected],
            InfoRequested => &[UnderReview, Rejected],
            InProgress => &[Validated, InfoRequested, Rejected],
            Validated => &[Completed, Rejected],
            Completed | Rejected => &[],
        }
    }

    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        self.successors().contains(&next)
    }
}

impl Default for RequestStatus {
    fn default() -> Self {
        RequestStatus::Submitted
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == trimmed || status.key() == trimmed)
            .ok_or_else(|| format!("unknown request status: {trimmed}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "Urgente")]
    Urgent,
    #[serde(rename = "Normale")]
    Normal,
    #[serde(rename = "Faible")]
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Urgent => "Urgente",
            Priority::Normal => "Normale",
            Priority::Low => "Faible",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Urgente" | "urgente" | "urgent" => Ok(Priority::Urgent),
            "Normale" | "normale" | "normal" => Ok(Priority::Normal),
            "Faible" | "faible" | "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("request is already in status {0}")]
    Unchanged(RequestStatus),
    #[error("status {from} is final")]
    Terminal { from: RequestStatus },
    #[error("cannot move request from {from} to {to}")]
    NotAllowed {
        from: RequestStatus,
        to: RequestStatus,
    },
}

/// Default request reference: `REQ-<unix millis>`.
pub fn new_reference_number() -> String {
    format!("REQ-{}", chrono::Utc::now().timestamp_millis())
}

/// Guard for the checked status path.
pub fn ensure_transition(
    from: RequestStatus,
    to: RequestStatus,
) -> Result<(), TransitionError> {
    if from == to {
        return Err(TransitionError::Unchanged(from));
    }
    if from.is_terminal() {
        return Err(TransitionError::Terminal { from });
    }
    if !from.can_transition_to(to) {
        return Err(TransitionError::NotAllowed { from, to });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_numbers_use_the_req_prefix() {
        let reference = new_reference_number();
        let millis = reference.strip_prefix("REQ-").unwrap();
        assert!(millis.chars().all(|ch| ch.is_ascii_digit()));
    }

    #[test]
    fn labels_round_trip_through_from_str() {
        for status in RequestStatus::ALL {
            assert_eq!(status.as_str().parse::<RequestStatus>(), Ok(status));
            assert_eq!(status.key().parse::<RequestStatus>(), Ok(status));
        }
        assert!("Archived".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn serde_uses_client_labels() {
        let json = serde_json::to_string(&RequestStatus::UnderReview).unwrap();
        assert_eq!(json, "\"En cours d'examen\"");
        let parsed: Priority = serde_json::from_str("\"Urgente\"").unwrap();
        assert_eq!(parsed, Priority::Urgent);
    }

    #[test]
    fn every_non_terminal_status_can_be_rejected() {
        for status in RequestStatus::ALL {
            if status.is_terminal() {
                assert!(status.successors().is_empty());
            } else {
                assert!(status.can_transition_to(RequestStatus::Rejected));
            }
        }
    }

    #[test]
    fn happy_path_is_allowed() {
        use RequestStatus::*;
        let path = [Submitted, UnderReview, InProgress, Validated, Completed];
        for pair in path.windows(2) {
            assert_eq!(ensure_transition(pair[0], pair[1]), Ok(()));
        }
    }

    #[test]
    fn skipping_stages_is_refused() {
        assert_eq!(
            ensure_transition(RequestStatus::Submitted, RequestStatus::Completed),
            Err(TransitionError::NotAllowed {
                from: RequestStatus::Submitted,
                to: RequestStatus::Completed,
            })
        );
    }

    #[test]
    fn terminal_and_unchanged_moves_are_refused() {
        assert_eq!(
            ensure_transition(RequestStatus::Rejected, RequestStatus::UnderReview),
            Err(TransitionError::Terminal {
                from: RequestStatus::Rejected
            })
        );
        assert_eq!(
            ensure_transition(RequestStatus::InProgress, RequestStatus::InProgress),
            Err(TransitionError::Unchanged(RequestStatus::InProgress))
        );
    }

    #[test]
    fn priority_accepts_lowercase_client_values() {
        assert_eq!("normale".parse::<Priority>(), Ok(Priority::Normal));
        assert_eq!("low".parse::<Priority>(), Ok(Priority::Low));
        assert!("critical".parse::<Priority>().is_err());
    }
}
