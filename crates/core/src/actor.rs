//! Actors, ports and the capability each actor is classified into.

use serde::{Deserialize, Serialize};

use crate::ids::{ActorId, PortId};

/// Direction of a port relative to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// A named input or output of an actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub id: PortId,
    pub owner: ActorId,
    pub name: String,
    pub direction: PortDirection,
}

/// Control actor settings. Each output port of a control actor is a branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSpec {
    /// Branch that represents a loop body. When it is taken the control
    /// actor is scheduled again after the branch's dependents.
    #[serde(default)]
    pub repeat_branch: Option<String>,
}

impl ControlSpec {
    /// A plain if/then/else style control actor.
    #[must_use]
    pub const fn branching() -> Self {
        Self {
            repeat_branch: None,
        }
    }

    /// A repeating control actor whose `body` branch loops.
    #[must_use]
    pub fn repeating(body: impl Into<String>) -> Self {
        Self {
            repeat_branch: Some(body.into()),
        }
    }
}

/// One named entry point of a multi-entry actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl EntryPoint {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn reads(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    #[must_use]
    pub fn writes(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }

    #[must_use]
    pub fn declares_input(&self, port: &str) -> bool {
        self.inputs.iter().any(|p| p == port)
    }

    #[must_use]
    pub fn declares_output(&self, port: &str) -> bool {
        self.outputs.iter().any(|p| p == port)
    }
}

/// The entry points a multi-entry actor exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoints {
    pub methods: Vec<EntryPoint>,
    /// Entry point fired by a tag that names no method.
    pub default_method: String,
}

impl EntryPoints {
    #[must_use]
    pub fn new(default_method: impl Into<String>) -> Self {
        Self {
            methods: Vec::new(),
            default_method: default_method.into(),
        }
    }

    #[must_use]
    pub fn with(mut self, method: EntryPoint) -> Self {
        self.methods.push(method);
        self
    }

    #[must_use]
    pub fn method(&self, name: &str) -> Option<&EntryPoint> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Name of the entry point a tag with `method` fires.
    #[must_use]
    pub fn resolve<'a>(&'a self, method: Option<&'a str>) -> &'a str {
        method.unwrap_or(self.default_method.as_str())
    }

    /// Entry points that declare `port` as an output.
    pub fn writers_of<'a>(&'a self, port: &'a str) -> impl Iterator<Item = &'a EntryPoint> + 'a {
        self.methods.iter().filter(move |m| m.declares_output(port))
    }

    /// Entry points that declare `port` as an input.
    pub fn readers_of<'a>(&'a self, port: &'a str) -> impl Iterator<Item = &'a EntryPoint> + 'a {
        self.methods.iter().filter(move |m| m.declares_input(port))
    }
}

/// What an actor can do, decided once when it is added to a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Capability {
    /// Fires once per tag, reading all inputs and writing all outputs.
    Plain,
    /// Enables some of its output branches each time it fires.
    Control(ControlSpec),
    /// Exposes several entry points with their own port sets.
    MultiEntry(EntryPoints),
    /// Ends the firing pass after it fires.
    Break,
    /// Non-opaque wrapper: never fires, relays its ports to contained actors.
    Composite,
}

impl Capability {
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(self, Self::Control(_))
    }

    #[must_use]
    pub const fn is_composite(&self) -> bool {
        matches!(self, Self::Composite)
    }

    #[must_use]
    pub const fn is_break(&self) -> bool {
        matches!(self, Self::Break)
    }

    #[must_use]
    pub const fn entry_points(&self) -> Option<&EntryPoints> {
        match self {
            Self::MultiEntry(methods) => Some(methods),
            _ => None,
        }
    }

    #[must_use]
    pub const fn control(&self) -> Option<&ControlSpec> {
        match self {
            Self::Control(spec) => Some(spec),
            _ => None,
        }
    }
}

/// An actor in a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    /// Enclosing composite, `None` at the top level.
    pub container: Option<ActorId>,
    pub capability: Capability,
    pub inputs: Vec<PortId>,
    pub outputs: Vec<PortId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_writer() -> EntryPoints {
        EntryPoints::new("read")
            .with(EntryPoint::new("read").reads("addr").writes("data"))
            .with(EntryPoint::new("write").reads("addr").reads("value"))
    }

    #[test]
    fn test_resolve_falls_back_to_default_method() {
        let methods = reader_writer();
        assert_eq!(methods.resolve(None), "read");
        assert_eq!(methods.resolve(Some("write")), "write");
    }

    #[test]
    fn test_readers_and_writers_of_port() {
        let methods = reader_writer();
        let readers: Vec<&str> = methods.readers_of("addr").map(|m| m.name.as_str()).collect();
        assert_eq!(readers, vec!["read", "write"]);
        let writers: Vec<&str> = methods.writers_of("data").map(|m| m.name.as_str()).collect();
        assert_eq!(writers, vec!["read"]);
        assert_eq!(methods.writers_of("value").count(), 0);
    }

    #[test]
    fn test_capability_queries() {
        assert!(Capability::Control(ControlSpec::branching()).is_control());
        assert!(Capability::Composite.is_composite());
        assert!(Capability::Break.is_break());
        assert!(Capability::MultiEntry(reader_writer()).entry_points().is_some());
        assert!(Capability::Plain.control().is_none());
        assert_eq!(
            ControlSpec::repeating("body").repeat_branch.as_deref(),
            Some("body")
        );
    }
}
