//! Arena identifiers.
//!
//! Actors, ports and tags live in flat vectors inside a [`Model`](crate::Model);
//! these newtypes are their stable indices.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(usize);

        impl $name {
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index)
            }

            #[must_use]
            pub const fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Index of an actor in its model.
    ActorId,
    "actor"
);
arena_id!(
    /// Index of a port in its model.
    PortId,
    "port"
);
arena_id!(
    /// Index of a sequence tag in its model.
    TagId,
    "tag"
);
