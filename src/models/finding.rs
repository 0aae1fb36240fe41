//! Finding model: the assessable instance of a control item within a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agent verdict on a single control finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Judgement {
    /// The corpus demonstrates the control is satisfied.
    Conformant,
    /// The corpus demonstrates the control is violated.
    NonConformant,
    /// The control is only partially satisfied.
    PartiallyConformant,
    /// The control does not apply to this corpus.
    NotApplicable,
    /// The agent could not confirm either way.
    Unconfirmed,
}

impl Judgement {
    /// Stable string form persisted in the `finding.judgement` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conformant => "conformant",
            Self::NonConformant => "non_conformant",
            Self::PartiallyConformant => "partially_conformant",
            Self::NotApplicable => "not_applicable",
            Self::Unconfirmed => "unconfirmed",
        }
    }

    /// Whether this judgement requires at least one evidence citation.
    #[must_use]
    pub fn requires_evidence(self) -> bool {
        matches!(self, Self::Conformant | Self::PartiallyConformant)
    }
}

/// Finding domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Finding {
    /// Unique record identifier.
    pub id: String,
    /// Owning job; immutable after creation.
    pub job_id: String,
    /// Immutable control item definition this finding assesses.
    pub control_item_id: String,
    /// Session currently owning this finding, if assigned.
    pub session_id: Option<String>,
    /// Agent verdict, unset until judged.
    pub judgement: Option<Judgement>,
    /// Free-text supplement accompanying the judgement.
    pub comment: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Finding {
    /// Construct an unassigned, unjudged finding for a control item.
    #[must_use]
    pub fn new(job_id: String, control_item_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            job_id,
            control_item_id,
            session_id: None,
            judgement: None,
            comment: None,
            created_at: now,
            updated_at: now,
        }
    }
}
