//! Sequence tags: the priority / process-group / entry-point annotation
//! that makes an actor "sequenced".

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ScheduleError, ScheduleResult};

/// Position of one actor (or one of its entry points) in the firing order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceTag {
    /// Lower priorities fire first. Unique within a validated scope.
    pub priority: u32,
    /// Process lane, `None` when the tag belongs to no group.
    #[serde(default, deserialize_with = "deserialize_process")]
    pub process: Option<String>,
    /// Entry point fired by this tag on a multi-entry actor.
    #[serde(default)]
    pub method: Option<String>,
}

impl SequenceTag {
    /// A tag with no process group and no entry point.
    #[must_use]
    pub const fn new(priority: u32) -> Self {
        Self {
            priority,
            process: None,
            method: None,
        }
    }

    /// Assign a process group. `""` and `"none"` clear it.
    #[must_use]
    pub fn with_process(mut self, process: impl AsRef<str>) -> Self {
        self.process = normalize_process(process.as_ref());
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Parse a textual priority, rejecting anything but a non-negative integer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPriority` for empty, negative, fractional or
    /// out-of-range input.
    pub fn parse_priority(text: &str) -> ScheduleResult<u32> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::invalid_priority("empty priority"));
        }
        trimmed.parse::<u32>().map_err(|e| {
            ScheduleError::invalid_priority(format!(
                "'{trimmed}' is not a non-negative integer: {e}"
            ))
        })
    }

    /// True when the tag belongs to no process group.
    #[must_use]
    pub const fn is_ungrouped(&self) -> bool {
        self.process.is_none()
    }
}

impl fmt::Display for SequenceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.priority)?;
        if let Some(process) = &self.process {
            write!(f, "@{process}")?;
        }
        if let Some(method) = &self.method {
            write!(f, ":{method}")?;
        }
        Ok(())
    }
}

/// Collapse the "no group" spellings to `None`.
#[must_use]
pub fn normalize_process(process: &str) -> Option<String> {
    let trimmed = process.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn deserialize_process<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(normalize_process))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_and_empty_process_mean_no_group() {
        assert!(SequenceTag::new(1).with_process("none").is_ungrouped());
        assert!(SequenceTag::new(1).with_process("NONE").is_ungrouped());
        assert!(SequenceTag::new(1).with_process("  ").is_ungrouped());
        assert_eq!(
            SequenceTag::new(1).with_process("lane-a").process.as_deref(),
            Some("lane-a")
        );
    }

    #[test]
    fn test_parse_priority_accepts_non_negative_integers() {
        assert_eq!(SequenceTag::parse_priority("0"), Ok(0));
        assert_eq!(SequenceTag::parse_priority(" 42 "), Ok(42));
    }

    #[test]
    fn test_parse_priority_rejects_garbage() {
        for bad in ["", "-1", "1.5", "abc", "99999999999"] {
            assert!(
                matches!(
                    SequenceTag::parse_priority(bad),
                    Err(ScheduleError::InvalidPriority(_))
                ),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn test_display_includes_group_and_method() {
        let tag = SequenceTag::new(3).with_process("p").with_method("read");
        assert_eq!(tag.to_string(), "3@p:read");
        assert_eq!(SequenceTag::new(7).to_string(), "7");
    }
}
