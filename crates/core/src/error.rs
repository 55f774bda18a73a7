//! Error types for schedule construction and firing passes.
//!
//! Every variant names the actors, tags or nodes involved. Structural errors
//! come out of `build()`; firing-time errors abort the current pass only.

use thiserror::Error;

/// Result type for scheduling operations.
pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;

/// Errors raised while modelling, scheduling or firing actors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("not schedulable: cycle detected involving nodes: {}", .0.join(", "))]
    StructuralCycle(Vec<String>),

    #[error("duplicate priority {priority} shared by: {}", .actors.join(", "))]
    DuplicatePriority { priority: u32, actors: Vec<String> },

    #[error("missing or misplaced sequence tag on '{actor}': {reason}")]
    MissingTag { actor: String, reason: String },

    #[error("actors unreachable from any sequenced actor: {}", .0.join(", "))]
    UnreachableActors(Vec<String>),

    #[error("structural change during firing pass: schedule built at generation {built}, model now at {current}")]
    ConcurrentStructuralChange { built: u64, current: u64 },

    #[error("control actor '{actor}' reported unknown branch '{branch}'")]
    UnknownBranch { actor: String, branch: String },

    #[error("actor '{actor}' is not ready to fire")]
    ActorNotReady { actor: String },

    #[error("repeating control actor '{actor}' exceeded {limit} iterations in one pass")]
    IterationLimitExceeded { actor: String, limit: usize },

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ScheduleError {
    pub fn cycle(mut nodes: Vec<String>) -> Self {
        nodes.sort();
        nodes.dedup();
        Self::StructuralCycle(nodes)
    }

    pub fn duplicate_priority(priority: u32, actors: Vec<String>) -> Self {
        Self::DuplicatePriority { priority, actors }
    }

    pub fn missing_tag(actor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingTag {
            actor: actor.into(),
            reason: reason.into(),
        }
    }

    pub fn unreachable(mut actors: Vec<String>) -> Self {
        actors.sort();
        actors.dedup();
        Self::UnreachableActors(actors)
    }

    pub fn unknown_branch(actor: impl Into<String>, branch: impl Into<String>) -> Self {
        Self::UnknownBranch {
            actor: actor.into(),
            branch: branch.into(),
        }
    }

    pub fn not_ready(actor: impl Into<String>) -> Self {
        Self::ActorNotReady {
            actor: actor.into(),
        }
    }

    pub fn invalid_model(reason: impl Into<String>) -> Self {
        Self::InvalidModel(reason.into())
    }

    pub fn invalid_priority(reason: impl Into<String>) -> Self {
        Self::InvalidPriority(reason.into())
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// True for errors that come from the structural configuration, as
    /// opposed to errors raised while a firing pass is running.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::StructuralCycle(_)
                | Self::DuplicatePriority { .. }
                | Self::MissingTag { .. }
                | Self::UnreachableActors(_)
                | Self::InvalidModel(_)
        )
    }
}
