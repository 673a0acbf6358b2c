//! Rip state machine
//!
//! [`transition`] is pure: it maps the current state and an event to the
//! next state plus the commands the executor has to run. All I/O lives in
//! the orchestrator.

use crate::accuraterip::VerificationOutcome;
use crate::cd::paranoia::ExtractionMethod;
use crate::rip::error::RipError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RipState {
    Idle,
    ExtractingFast {
        current: u8,
        remaining: Vec<u8>,
        /// Tracks that exhausted their retry budget
        exhausted: Vec<u8>,
    },
    Verifying {
        pending: Vec<u8>,
        exhausted: Vec<u8>,
    },
    SelectiveReExtract {
        current: u8,
        remaining: Vec<u8>,
        extracted: Vec<u8>,
        /// Tracks that stay mismatched whatever the re-read gives
        residual: usize,
    },
    ReVerifying {
        pending: Vec<u8>,
        residual: usize,
    },
    Finalizing {
        residual_mismatches: usize,
    },
    Completed {
        residual_mismatches: usize,
    },
    Failed {
        error: RipError,
    },
    Cancelled,
}

impl RipState {
    pub fn name(&self) -> &'static str {
        match self {
            RipState::Idle => "Idle",
            RipState::ExtractingFast { .. } => "ExtractingFast",
            RipState::Verifying { .. } => "Verifying",
            RipState::SelectiveReExtract { .. } => "SelectiveReExtract",
            RipState::ReVerifying { .. } => "ReVerifying",
            RipState::Finalizing { .. } => "Finalizing",
            RipState::Completed { .. } => "Completed",
            RipState::Failed { .. } => "Failed",
            RipState::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RipState::Completed { .. } | RipState::Failed { .. } | RipState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RipEvent {
    /// The disc was accepted for ripping
    Accepted,
    /// An extraction finished; `readable` is false when the retry budget
    /// was exhausted
    Extracted { track: u8, readable: bool },
    /// Verification produced outcomes for the submitted batch
    Verified {
        outcomes: Vec<(u8, VerificationOutcome)>,
    },
    Finalized,
    Failed(RipError),
    CancelRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RipCommand {
    Extract { track: u8, method: ExtractionMethod },
    Verify { tracks: Vec<u8> },
    Finalize,
}

/// Fixed inputs of one job's state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipPlan {
    /// Tracks to extract in order (0 first when the hidden track is ripped)
    pub tracks: Vec<u8>,
    /// Tracks the database cannot verify
    pub unverifiable: Vec<u8>,
    pub verify: bool,
    pub reextract: bool,
}

impl RipPlan {
    fn verifiable(&self, tracks: &[u8]) -> Vec<u8> {
        tracks
            .iter()
            .copied()
            .filter(|t| !self.unverifiable.contains(t))
            .collect()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("event {event} is not valid in state {state}")]
pub struct TransitionError {
    pub state: &'static str,
    pub event: String,
}

pub type Transition = (RipState, Vec<RipCommand>);

/// Compute the next state and commands for `event`
pub fn transition(
    state: &RipState,
    event: RipEvent,
    plan: &RipPlan,
) -> Result<Transition, TransitionError> {
    if state.is_terminal() {
        return Err(invalid(state, &event));
    }

    match (state, event) {
        (_, RipEvent::CancelRequested) => Ok((RipState::Cancelled, vec![])),
        (_, RipEvent::Failed(error)) => Ok((RipState::Failed { error }, vec![])),

        (RipState::Idle, RipEvent::Accepted) => match plan.tracks.split_first() {
            Some((first, rest)) => Ok((
                RipState::ExtractingFast {
                    current: *first,
                    remaining: rest.to_vec(),
                    exhausted: vec![],
                },
                vec![extract(*first, ExtractionMethod::Fast)],
            )),
            None => Ok(finalize(0)),
        },

        (
            RipState::ExtractingFast {
                current,
                remaining,
                exhausted,
            },
            RipEvent::Extracted { track, readable },
        ) if track == *current => {
            let mut exhausted = exhausted.clone();
            if !readable {
                exhausted.push(track);
            }
            if let Some((next, rest)) = remaining.split_first() {
                return Ok((
                    RipState::ExtractingFast {
                        current: *next,
                        remaining: rest.to_vec(),
                        exhausted,
                    },
                    vec![extract(*next, ExtractionMethod::Fast)],
                ));
            }

            if !plan.verify {
                return Ok(finalize(exhausted.len()));
            }
            let read: Vec<u8> = plan
                .tracks
                .iter()
                .copied()
                .filter(|t| !exhausted.contains(t))
                .collect();
            let pending = plan.verifiable(&read);
            if pending.is_empty() {
                return Ok(after_verification(plan, exhausted, vec![]));
            }
            Ok((
                RipState::Verifying {
                    pending: pending.clone(),
                    exhausted,
                },
                vec![RipCommand::Verify { tracks: pending }],
            ))
        }

        (RipState::Verifying { pending, exhausted }, RipEvent::Verified { outcomes })
            if covers(pending, &outcomes) =>
        {
            let mismatched: Vec<u8> = pending
                .iter()
                .copied()
                .filter(|t| outcome_of(&outcomes, *t).is_some_and(|o| o.is_mismatch()))
                .collect();
            Ok(after_verification(plan, exhausted.clone(), mismatched))
        }

        (
            RipState::SelectiveReExtract {
                current,
                remaining,
                extracted,
                residual,
            },
            RipEvent::Extracted { track, readable },
        ) if track == *current => {
            let mut extracted = extracted.clone();
            let mut residual = *residual;
            if readable {
                extracted.push(track);
            } else {
                residual += 1;
            }
            if let Some((next, rest)) = remaining.split_first() {
                return Ok((
                    RipState::SelectiveReExtract {
                        current: *next,
                        remaining: rest.to_vec(),
                        extracted,
                        residual,
                    },
                    vec![extract(*next, ExtractionMethod::Thorough)],
                ));
            }

            // Re-read tracks the database cannot judge keep no mismatch
            let pending = plan.verifiable(&extracted);
            if pending.is_empty() {
                return Ok(finalize(residual));
            }
            Ok((
                RipState::ReVerifying {
                    pending: pending.clone(),
                    residual,
                },
                vec![RipCommand::Verify { tracks: pending }],
            ))
        }

        (RipState::ReVerifying { pending, residual }, RipEvent::Verified { outcomes })
            if covers(pending, &outcomes) =>
        {
            let still_bad = pending
                .iter()
                .filter(|t| outcome_of(&outcomes, **t).is_some_and(|o| o.is_mismatch()))
                .count();
            Ok(finalize(residual + still_bad))
        }

        (
            RipState::Finalizing {
                residual_mismatches,
            },
            RipEvent::Finalized,
        ) => Ok((
            RipState::Completed {
                residual_mismatches: *residual_mismatches,
            },
            vec![],
        )),

        (state, event) => Err(invalid(state, &event)),
    }
}

/// Route to thorough re-extraction or straight to finalizing
fn after_verification(plan: &RipPlan, exhausted: Vec<u8>, mismatched: Vec<u8>) -> Transition {
    let mut candidates = exhausted;
    candidates.extend(mismatched);
    candidates.sort_unstable();
    candidates.dedup();

    if !plan.reextract {
        return finalize(candidates.len());
    }
    match candidates.split_first() {
        Some((first, rest)) => (
            RipState::SelectiveReExtract {
                current: *first,
                remaining: rest.to_vec(),
                extracted: vec![],
                residual: 0,
            },
            vec![extract(*first, ExtractionMethod::Thorough)],
        ),
        None => finalize(0),
    }
}

fn finalize(residual_mismatches: usize) -> Transition {
    (
        RipState::Finalizing {
            residual_mismatches,
        },
        vec![RipCommand::Finalize],
    )
}

fn extract(track: u8, method: ExtractionMethod) -> RipCommand {
    RipCommand::Extract { track, method }
}

fn outcome_of(outcomes: &[(u8, VerificationOutcome)], track: u8) -> Option<&VerificationOutcome> {
    outcomes.iter().find(|(t, _)| *t == track).map(|(_, o)| o)
}

fn covers(pending: &[u8], outcomes: &[(u8, VerificationOutcome)]) -> bool {
    pending.iter().all(|t| outcome_of(outcomes, *t).is_some())
}

fn invalid(state: &RipState, event: &RipEvent) -> TransitionError {
    TransitionError {
        state: state.name(),
        event: format!("{:?}", event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuraterip::{MismatchReason, UnavailableReason};

    fn plan(n: u8) -> RipPlan {
        RipPlan {
            tracks: (1..=n).collect(),
            unverifiable: vec![],
            verify: true,
            reextract: true,
        }
    }

    fn matched() -> VerificationOutcome {
        VerificationOutcome::Match { confidence: 3 }
    }

    fn mismatched() -> VerificationOutcome {
        VerificationOutcome::Mismatch(MismatchReason::Checksum)
    }

    /// Drive the machine through the fast pass with every read succeeding
    /// except `bad`
    fn run_fast_pass(plan: &RipPlan, bad: &[u8]) -> Transition {
        let (mut state, mut commands) = transition(&RipState::Idle, RipEvent::Accepted, plan).unwrap();
        while let [RipCommand::Extract { track, method }] = commands.as_slice() {
            assert_eq!(*method, ExtractionMethod::Fast);
            let event = RipEvent::Extracted {
                track: *track,
                readable: !bad.contains(track),
            };
            (state, commands) = transition(&state, event, plan).unwrap();
        }
        (state, commands)
    }

    #[test]
    fn test_fast_pass_extracts_in_order_then_verifies() {
        let plan = plan(3);
        let (state, commands) = run_fast_pass(&plan, &[]);
        assert_eq!(state.name(), "Verifying");
        assert_eq!(commands, vec![RipCommand::Verify { tracks: vec![1, 2, 3] }]);
    }

    #[test]
    fn test_all_match_goes_to_finalizing() {
        let plan = plan(3);
        let (state, _) = run_fast_pass(&plan, &[]);
        let outcomes = (1..=3).map(|t| (t, matched())).collect();
        let (state, commands) = transition(&state, RipEvent::Verified { outcomes }, &plan).unwrap();
        assert_eq!(state, RipState::Finalizing { residual_mismatches: 0 });
        assert_eq!(commands, vec![RipCommand::Finalize]);

        let (state, commands) = transition(&state, RipEvent::Finalized, &plan).unwrap();
        assert_eq!(state, RipState::Completed { residual_mismatches: 0 });
        assert!(commands.is_empty());
    }

    #[test]
    fn test_only_mismatches_are_reextracted() {
        let plan = plan(4);
        let (state, _) = run_fast_pass(&plan, &[]);
        let outcomes = vec![
            (1, matched()),
            (2, mismatched()),
            (3, VerificationOutcome::Unavailable(UnavailableReason::TrackCountMismatch)),
            (4, VerificationOutcome::NotChecked),
        ];
        let (state, commands) = transition(&state, RipEvent::Verified { outcomes }, &plan).unwrap();
        assert_eq!(state.name(), "SelectiveReExtract");
        assert_eq!(
            commands,
            vec![RipCommand::Extract {
                track: 2,
                method: ExtractionMethod::Thorough
            }]
        );

        let (state, commands) = transition(
            &state,
            RipEvent::Extracted {
                track: 2,
                readable: true,
            },
            &plan,
        )
        .unwrap();
        assert_eq!(state.name(), "ReVerifying");
        assert_eq!(commands, vec![RipCommand::Verify { tracks: vec![2] }]);

        let (state, _) = transition(
            &state,
            RipEvent::Verified {
                outcomes: vec![(2, mismatched())],
            },
            &plan,
        )
        .unwrap();
        assert_eq!(state, RipState::Finalizing { residual_mismatches: 1 });
    }

    #[test]
    fn test_exhausted_track_skips_verification_and_is_reextracted() {
        let plan = plan(3);
        let (state, commands) = run_fast_pass(&plan, &[2]);
        assert_eq!(commands, vec![RipCommand::Verify { tracks: vec![1, 3] }]);

        let outcomes = vec![(1, matched()), (3, matched())];
        let (_, commands) = transition(&state, RipEvent::Verified { outcomes }, &plan).unwrap();
        assert_eq!(
            commands,
            vec![RipCommand::Extract {
                track: 2,
                method: ExtractionMethod::Thorough
            }]
        );
    }

    #[test]
    fn test_verification_disabled_never_reextracts() {
        let plan = RipPlan {
            verify: false,
            ..plan(3)
        };
        let (state, commands) = run_fast_pass(&plan, &[1, 3]);
        assert_eq!(state, RipState::Finalizing { residual_mismatches: 2 });
        assert_eq!(commands, vec![RipCommand::Finalize]);
    }

    #[test]
    fn test_reextract_disabled_keeps_mismatches() {
        let plan = RipPlan {
            reextract: false,
            ..plan(2)
        };
        let (state, _) = run_fast_pass(&plan, &[]);
        let outcomes = vec![(1, mismatched()), (2, matched())];
        let (state, _) = transition(&state, RipEvent::Verified { outcomes }, &plan).unwrap();
        assert_eq!(state, RipState::Finalizing { residual_mismatches: 1 });
    }

    #[test]
    fn test_cancel_during_fast_pass() {
        let plan = plan(10);
        let (state, _) = transition(&RipState::Idle, RipEvent::Accepted, &plan).unwrap();
        let (state, commands) = transition(&state, RipEvent::CancelRequested, &plan).unwrap();
        assert_eq!(state, RipState::Cancelled);
        assert!(commands.is_empty());

        // Terminal states accept nothing further
        assert!(transition(&state, RipEvent::Finalized, &plan).is_err());
    }

    #[test]
    fn test_partial_verification_batch_is_rejected() {
        let plan = plan(3);
        let (state, _) = run_fast_pass(&plan, &[]);
        let outcomes = vec![(1, mismatched())];
        let err = transition(&state, RipEvent::Verified { outcomes }, &plan).unwrap_err();
        assert_eq!(err.state, "Verifying");
    }

    #[test]
    fn test_out_of_order_extraction_is_rejected() {
        let plan = plan(3);
        let (state, _) = transition(&RipState::Idle, RipEvent::Accepted, &plan).unwrap();
        let event = RipEvent::Extracted {
            track: 3,
            readable: true,
        };
        assert!(transition(&state, event, &plan).is_err());
    }

    #[test]
    fn test_hidden_track_is_not_submitted_for_verification() {
        let plan = RipPlan {
            tracks: vec![0, 1, 2],
            unverifiable: vec![0],
            verify: true,
            reextract: true,
        };
        let (_, commands) = run_fast_pass(&plan, &[]);
        assert_eq!(commands, vec![RipCommand::Verify { tracks: vec![1, 2] }]);
    }

    #[test]
    fn test_failure_is_terminal_and_distinct_from_cancel() {
        let plan = plan(2);
        let (state, _) = transition(&RipState::Idle, RipEvent::Accepted, &plan).unwrap();
        let error = RipError::Storage {
            stage: crate::rip::error::Stage::FastExtraction,
            track: Some(1),
            message: "No space left on device".into(),
        };
        let (state, commands) = transition(&state, RipEvent::Failed(error.clone()), &plan).unwrap();
        assert_eq!(state, RipState::Failed { error });
        assert!(commands.is_empty());
    }
}
