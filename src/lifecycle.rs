//! Pure session lifecycle state machine.
//!
//! The transition table lives here as a total function over
//! `(current status, trigger, guard context)` with no persistence or
//! hidden mutation; callers apply the returned status themselves. This
//! keeps the table unit-testable in isolation and makes every invalid
//! trigger an explicit, named error rather than a silent no-op.

use std::fmt::{Display, Formatter};

use crate::models::finding::Finding;
use crate::models::session::SessionStatus;

/// Lifecycle triggers accepted by [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Begin assessment (scheduler dispatch or first agent action).
    Start,
    /// Agent submits its completed work for human review.
    Submit,
    /// Human reviewer sends the session back for rework.
    Reject,
    /// Human reviewer accepts the submission.
    Complete,
    /// System forces the session out of assessment (limit or stall).
    Abandon,
    /// Operator force-fails the session from any state.
    ForceFail,
}

impl Trigger {
    /// Stable lowercase name used in error messages and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Submit => "submit",
            Self::Reject => "reject",
            Self::Complete => "complete",
            Self::Abandon => "abandon",
            Self::ForceFail => "force_fail",
        }
    }
}

/// Findings that block a `submit`, separated by cause so the caller can
/// show an actionable message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitBlockers {
    /// Control item ids of findings with no judgement at all.
    pub missing_judgement: Vec<String>,
    /// Control item ids judged conformant/partially-conformant with zero evidence.
    pub missing_evidence: Vec<String>,
}

impl SubmitBlockers {
    /// Whether the submission guard passes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing_judgement.is_empty() && self.missing_evidence.is_empty()
    }
}

impl Display for SubmitBlockers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "missing judgement: [{}]; judged without evidence: [{}]",
            self.missing_judgement.join(", "),
            self.missing_evidence.join(", ")
        )
    }
}

/// Why a trigger was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The trigger is not defined for the session's current status.
    InvalidTrigger {
        /// Status the session was in when the trigger fired.
        from: SessionStatus,
        /// The refused trigger.
        trigger: Trigger,
    },
    /// The `submit` guard failed; lists the offending findings.
    IncompleteSubmission(SubmitBlockers),
}

impl Display for TransitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTrigger { from, trigger } => write!(
                f,
                "trigger '{}' is not valid from status '{}'",
                trigger.as_str(),
                from.as_str()
            ),
            Self::IncompleteSubmission(blockers) => {
                write!(f, "submission validation failed: {blockers}")
            }
        }
    }
}

/// A finding snapshot carrying exactly what the submit guard inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingSnapshot {
    /// Control item id, used to name the finding in guard failures.
    pub control_item_id: String,
    /// Whether the finding has any judgement set.
    pub judged: bool,
    /// Whether the current judgement requires evidence to submit.
    pub needs_evidence: bool,
    /// Number of evidence citations currently attached.
    pub evidence_count: i64,
}

impl FindingSnapshot {
    /// Derive a guard snapshot from a finding and its evidence count.
    #[must_use]
    pub fn from_finding(finding: &Finding, evidence_count: i64) -> Self {
        Self {
            control_item_id: finding.control_item_id.clone(),
            judged: finding.judgement.is_some(),
            needs_evidence: finding
                .judgement
                .is_some_and(crate::models::finding::Judgement::requires_evidence),
            evidence_count,
        }
    }
}

/// Evaluate the submission guard over a session's assigned findings.
#[must_use]
pub fn submit_blockers(findings: &[FindingSnapshot]) -> SubmitBlockers {
    let mut blockers = SubmitBlockers::default();
    for finding in findings {
        if !finding.judged {
            blockers.missing_judgement.push(finding.control_item_id.clone());
        } else if finding.needs_evidence && finding.evidence_count == 0 {
            blockers.missing_evidence.push(finding.control_item_id.clone());
        }
    }
    blockers
}

/// Apply a lifecycle trigger to a session status.
///
/// `findings` is only inspected by the `submit` guard; all other triggers
/// ignore it. `Abandoned → submit` is the stall-recovery path: after the
/// sweep backfills placeholder judgements the session is pushed into
/// review rather than left invisible.
///
/// # Errors
///
/// Returns [`TransitionError::InvalidTrigger`] when the trigger is not
/// defined for the current status, and
/// [`TransitionError::IncompleteSubmission`] when the submit guard fails.
pub fn transition(
    current: SessionStatus,
    trigger: Trigger,
    findings: &[FindingSnapshot],
) -> Result<SessionStatus, TransitionError> {
    use SessionStatus::{
        Abandoned, AssessingControls, Completed, Failed, ReadyForAssessment, SubmittedForReview,
    };

    match (current, trigger) {
        (_, Trigger::ForceFail) => Ok(Failed),
        (ReadyForAssessment, Trigger::Start) => Ok(AssessingControls),
        (AssessingControls | Abandoned, Trigger::Submit) => {
            let blockers = submit_blockers(findings);
            if blockers.is_empty() {
                Ok(SubmittedForReview)
            } else {
                Err(TransitionError::IncompleteSubmission(blockers))
            }
        }
        (AssessingControls, Trigger::Abandon) => Ok(Abandoned),
        (SubmittedForReview, Trigger::Reject) => Ok(AssessingControls),
        (SubmittedForReview, Trigger::Complete) => Ok(Completed),
        (from, trigger) => Err(TransitionError::InvalidTrigger { from, trigger }),
    }
}
