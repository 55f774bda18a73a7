//! Fluent construction of models by name.
//!
//! ```
//! use tempo_core::{Capability, ModelBuilder, SequenceTag};
//!
//! # fn main() -> Result<(), tempo_core::ScheduleError> {
//! let model = ModelBuilder::new("pipeline")
//!     .with_actor("source", Capability::Plain)
//!     .with_actor("sink", Capability::Plain)
//!     .with_output("source", "out")
//!     .with_input("sink", "in")
//!     .with_link("source.out", "sink.in")
//!     .with_tag("source", SequenceTag::new(1))
//!     .with_tag("sink", SequenceTag::new(2))
//!     .build()?;
//! assert_eq!(model.tags().count(), 2);
//! # Ok(())
//! # }
//! ```

use crate::actor::Capability;
use crate::error::{ScheduleError, ScheduleResult};
use crate::ids::{ActorId, PortId};
use crate::model::Model;
use crate::tag::SequenceTag;

/// Builds a [`Model`] step by step; the first failing step is reported by
/// [`ModelBuilder::build`].
#[derive(Debug)]
pub struct ModelBuilder {
    model: Model,
    error: Option<ScheduleError>,
}

impl ModelBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            model: Model::new(name),
            error: None,
        }
    }

    fn apply<F>(mut self, step: F) -> Self
    where
        F: FnOnce(&mut Model) -> ScheduleResult<()>,
    {
        if self.error.is_none() {
            if let Err(e) = step(&mut self.model) {
                self.error = Some(e);
            }
        }
        self
    }

    #[must_use]
    pub fn with_actor(self, name: &str, capability: Capability) -> Self {
        self.apply(|m| m.add_actor(name, capability).map(|_| ()))
    }

    #[must_use]
    pub fn with_actor_in(self, container: &str, name: &str, capability: Capability) -> Self {
        self.apply(|m| {
            let parent = actor_id(m, container)?;
            m.add_actor_in(parent, name, capability).map(|_| ())
        })
    }

    #[must_use]
    pub fn with_input(self, actor: &str, port: &str) -> Self {
        self.apply(|m| {
            let id = actor_id(m, actor)?;
            m.add_input(id, port).map(|_| ())
        })
    }

    #[must_use]
    pub fn with_output(self, actor: &str, port: &str) -> Self {
        self.apply(|m| {
            let id = actor_id(m, actor)?;
            m.add_output(id, port).map(|_| ())
        })
    }

    /// Link two ports addressed as `"actor.port"`.
    #[must_use]
    pub fn with_link(self, from: &str, to: &str) -> Self {
        self.apply(|m| {
            let source = port_id(m, from)?;
            let sink = port_id(m, to)?;
            m.connect(source, sink)
        })
    }

    #[must_use]
    pub fn with_tag(self, actor: &str, tag: SequenceTag) -> Self {
        self.apply(|m| {
            let id = actor_id(m, actor)?;
            m.add_tag(id, tag).map(|_| ())
        })
    }

    /// Finish the model.
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that failed.
    pub fn build(self) -> ScheduleResult<Model> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.model),
        }
    }
}

fn actor_id(model: &Model, name: &str) -> ScheduleResult<ActorId> {
    model
        .actor_by_name(name)
        .map(|a| a.id)
        .ok_or_else(|| ScheduleError::invalid_model(format!("unknown actor '{name}'")))
}

fn port_id(model: &Model, address: &str) -> ScheduleResult<PortId> {
    let (actor, port) = address.rsplit_once('.').ok_or_else(|| {
        ScheduleError::invalid_model(format!("port address '{address}' is not 'actor.port'"))
    })?;
    let owner = actor_id(model, actor)?;
    model
        .port_by_name(owner, port)
        .map(|p| p.id)
        .ok_or_else(|| ScheduleError::invalid_model(format!("unknown port '{address}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_reports_first_error() {
        let result = ModelBuilder::new("m")
            .with_actor("a", Capability::Plain)
            .with_output("ghost", "out")
            .with_output("a", "out")
            .build();
        assert!(
            matches!(result, Err(ScheduleError::InvalidModel(ref msg)) if msg.contains("ghost"))
        );
    }

    #[test]
    fn test_builder_rejects_malformed_address() {
        let result = ModelBuilder::new("m")
            .with_actor("a", Capability::Plain)
            .with_link("a", "a.in")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_links_by_name() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("a", Capability::Plain)
            .with_actor("b", Capability::Plain)
            .with_output("a", "out")
            .with_input("b", "in")
            .with_link("a.out", "b.in")
            .with_tag("b", SequenceTag::new(3))
            .build()?;

        let b = actor_id(&model, "b")?;
        let input = port_id(&model, "b.in")?;
        assert_eq!(model.deep_sources(input), vec![port_id(&model, "a.out")?]);
        assert_eq!(model.tags_of(b).len(), 1);
        assert!(model.tag_named("b").is_some());
        assert!(model.tag_named("a").is_none());
        Ok(())
    }
}
