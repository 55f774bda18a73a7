//! Configuration for schedule construction.

use serde::{Deserialize, Serialize};

use tempo_core::{ScheduleError, ScheduleResult};

/// How process lanes are ordered relative to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneOrdering {
    /// Lane whose first independent tag has the lowest priority goes first.
    #[default]
    LowestPriority,
    /// The ungrouped lane first, then lanes by process name.
    Name,
}

/// What the lane planner does with actors no subgraph subsumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreachablePolicy {
    /// Fail the plan with `UnreachableActors`.
    #[default]
    Error,
    /// Log them and keep the plan.
    Warn,
}

/// Configuration for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Reject duplicate priorities in ordinary (non-replay) builds.
    #[serde(default = "default_validate_priorities")]
    pub validate_priorities: bool,

    #[serde(default)]
    pub lane_ordering: LaneOrdering,

    #[serde(default)]
    pub unreachable_policy: UnreachablePolicy,

    /// How often one repeating control actor may be rescheduled in a pass.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            validate_priorities: default_validate_priorities(),
            lane_ordering: LaneOrdering::default(),
            unreachable_policy: UnreachablePolicy::default(),
            max_loop_iterations: default_max_loop_iterations(),
        }
    }
}

impl SchedulerConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the document does not parse or fails
    /// [`SchedulerConfig::validate`].
    pub fn from_toml_str(text: &str) -> ScheduleResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ScheduleError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `max_loop_iterations` is zero.
    pub fn validate(&self) -> ScheduleResult<()> {
        if self.max_loop_iterations == 0 {
            return Err(ScheduleError::invalid_config(
                "max_loop_iterations must be greater than 0",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn with_unreachable_policy(mut self, policy: UnreachablePolicy) -> Self {
        self.unreachable_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_lane_ordering(mut self, ordering: LaneOrdering) -> Self {
        self.lane_ordering = ordering;
        self
    }

    #[must_use]
    pub const fn with_max_loop_iterations(mut self, limit: usize) -> Self {
        self.max_loop_iterations = limit;
        self
    }
}

const fn default_validate_priorities() -> bool {
    true
}

const fn default_max_loop_iterations() -> usize {
    10_000
}
