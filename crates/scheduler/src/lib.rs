//! # tempo-scheduler
//!
//! Firing order for sequenced dataflow actors.
//!
//! The [`Scheduler`] derives static structures from a [`Model`]: the
//! [`DependencyGraph`], one [`Subgraph`] per tag and the
//! [`ControlBranchTable`]. It wraps them in a [`Schedule`], and every
//! execution pass walks the schedule with its own [`FiringSequence`].
//!
//! ```
//! use tempo_core::{Capability, ModelBuilder, ScheduleResult, SequenceTag};
//! use tempo_scheduler::{FiringRecord, Scheduler};
//!
//! # fn main() -> Result<(), tempo_core::ScheduleError> {
//! let model = ModelBuilder::new("pipeline")
//!     .with_actor("p", Capability::Plain)
//!     .with_actor("q", Capability::Plain)
//!     .with_output("p", "out")
//!     .with_input("q", "in")
//!     .with_link("p.out", "q.in")
//!     .with_tag("p", SequenceTag::new(1))
//!     .with_tag("q", SequenceTag::new(2))
//!     .build()?;
//!
//! let mut scheduler = Scheduler::default();
//! let schedule = scheduler.build(&model, &model.tag_ids())?;
//! let no_branches = |_: &FiringRecord| -> ScheduleResult<Vec<String>> { Ok(Vec::new()) };
//! let order: Vec<String> = schedule
//!     .new_firing_sequence()
//!     .drain_with(&no_branches)?
//!     .iter()
//!     .map(ToString::to_string)
//!     .collect();
//! assert_eq!(order, vec!["p", "q"]);
//! # Ok(())
//! # }
//! ```
//!
//! [`Model`]: tempo_core::Model

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod branch;
pub mod config;
pub mod firing;
pub mod graph;
pub mod lanes;
pub mod schedule;
pub mod scheduler;
pub mod subgraph;

pub use tempo_core::{ScheduleError, ScheduleResult};

pub use branch::{Branch, BranchEntryId, BranchTableBuilder, BranchTableEntry, ControlBranchTable};
pub use config::{LaneOrdering, SchedulerConfig, UnreachablePolicy};
pub use firing::{BranchOracle, FiringSequence, SequenceState};
pub use graph::{DependencyGraph, GraphNode, NodeWeight};
pub use lanes::{Lane, LanePlan, LanePlanner};
pub use schedule::{FiringRecord, Schedule, TagInfo};
pub use scheduler::Scheduler;
pub use subgraph::{Subgraph, SubgraphResolver, VisitedSet};
