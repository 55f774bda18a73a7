//! # tempo-core
//!
//! The actor model consumed by the tempo scheduler: actors classified by
//! capability, their ports and links, sequence tags, the structural
//! generation counter, and the shared error type.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod actor;
pub mod builder;
pub mod error;
pub mod generation;
pub mod ids;
pub mod model;
pub mod tag;

pub use actor::{Actor, Capability, ControlSpec, EntryPoint, EntryPoints, Port, PortDirection};
pub use builder::ModelBuilder;
pub use error::{ScheduleError, ScheduleResult};
pub use generation::Generation;
pub use ids::{ActorId, PortId, TagId};
pub use model::{Model, TagRecord};
pub use tag::{SequenceTag, normalize_process};
