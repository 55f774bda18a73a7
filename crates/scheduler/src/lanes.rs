//! # Process lanes
//!
//! Partitions a model's tags by process group and builds one [`Schedule`]
//! per lane. Branch dependents fire through their control actor, so they
//! are found first and left out of the partition; each lane's build picks
//! them up again from its own control actors.

use std::collections::BTreeMap;

use tracing::{info, warn};

use tempo_core::{Model, ScheduleError, ScheduleResult, TagId};

use crate::config::{LaneOrdering, UnreachablePolicy};
use crate::schedule::Schedule;
use crate::scheduler::Scheduler;

/// The schedule of one process group.
#[derive(Debug, Clone)]
pub struct Lane {
    /// `None` for tags that belong to no group.
    pub process: Option<String>,
    pub schedule: Schedule,
}

impl Lane {
    /// Priority of the first independent tag, if any.
    #[must_use]
    pub fn lowest_priority(&self) -> Option<u32> {
        self.schedule
            .independent()
            .first()
            .and_then(|t| self.schedule.tag_info(*t))
            .map(|info| info.priority)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.process.as_deref().unwrap_or("none")
    }
}

/// Lanes in execution order, plus any unreachable actors the configured
/// policy let through.
#[derive(Debug, Clone, Default)]
pub struct LanePlan {
    lanes: Vec<Lane>,
    unreachable: Vec<String>,
}

impl LanePlan {
    #[must_use]
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    #[must_use]
    pub fn lane(&self, process: Option<&str>) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.process.as_deref() == process)
    }

    /// Unreachable actor names, only non-empty under `UnreachablePolicy::Warn`.
    #[must_use]
    pub fn unreachable(&self) -> &[String] {
        &self.unreachable
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Reorder the lanes.
    pub fn reorder_by(&mut self, ordering: LaneOrdering) {
        match ordering {
            LaneOrdering::LowestPriority => {
                self.lanes.sort_by(|a, b| {
                    a.lowest_priority()
                        .cmp(&b.lowest_priority())
                        .then_with(|| a.process.cmp(&b.process))
                });
            }
            LaneOrdering::Name => self.lanes.sort_by(|a, b| a.process.cmp(&b.process)),
        }
    }
}

/// Builds every lane of a model with one scheduler.
#[derive(Debug)]
pub struct LanePlanner<'s> {
    scheduler: &'s mut Scheduler,
}

impl<'s> LanePlanner<'s> {
    #[must_use]
    pub fn new(scheduler: &'s mut Scheduler) -> Self {
        Self { scheduler }
    }

    /// Build one schedule per process group over every live tag of
    /// `model`, then apply the unreachable-actor policy.
    ///
    /// # Errors
    ///
    /// * Any error of [`Scheduler::build`] for any lane.
    /// * `UnreachableActors` under `UnreachablePolicy::Error`.
    pub fn plan(&mut self, model: &Model) -> ScheduleResult<LanePlan> {
        let config = self.scheduler.config().clone();
        let all = model.tag_ids();
        let branches = self.scheduler.branch_table(model, &all, config.validate_priorities)?;

        let mut partitions: BTreeMap<Option<String>, Vec<TagId>> = BTreeMap::new();
        for tag in all.iter().filter(|t| !branches.is_dependent(**t)) {
            let record = model.require_tag(*tag)?;
            partitions
                .entry(record.tag.process.clone())
                .or_default()
                .push(*tag);
        }

        let mut lanes = Vec::with_capacity(partitions.len());
        for (process, tags) in partitions {
            let schedule = self.scheduler.build(model, &tags)?;
            lanes.push(Lane { process, schedule });
        }

        let mut plan = LanePlan {
            lanes,
            unreachable: Vec::new(),
        };
        plan.reorder_by(config.lane_ordering);

        let unreachable: Vec<String> = self
            .scheduler
            .unreachable_actors(model)?
            .iter()
            .map(|a| a.name.clone())
            .collect();
        if !unreachable.is_empty() {
            match config.unreachable_policy {
                UnreachablePolicy::Error => return Err(ScheduleError::unreachable(unreachable)),
                UnreachablePolicy::Warn => {
                    warn!(actors = ?unreachable, "actors unreachable from any sequenced actor");
                    plan.unreachable = unreachable;
                }
            }
        }

        info!(
            model = %model.name(),
            lanes = plan.len(),
            order = ?plan.lanes.iter().map(Lane::name).collect::<Vec<_>>(),
            "lane plan built"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::config::SchedulerConfig;
    use tempo_core::{Capability, ControlSpec, ModelBuilder, SequenceTag};

    fn two_lanes() -> ScheduleResult<Model> {
        ModelBuilder::new("lanes")
            .with_actor("audio", Capability::Plain)
            .with_actor("video", Capability::Plain)
            .with_actor("main", Capability::Plain)
            .with_tag("audio", SequenceTag::new(1).with_process("io"))
            .with_tag("video", SequenceTag::new(2).with_process("gfx"))
            .with_tag("main", SequenceTag::new(3).with_process("none"))
            .build()
    }

    #[test]
    fn test_tags_partitioned_by_process() -> ScheduleResult<()> {
        let model = two_lanes()?;
        let mut scheduler = Scheduler::default();
        let plan = LanePlanner::new(&mut scheduler).plan(&model)?;

        assert_eq!(plan.len(), 3);
        let names: Vec<&str> = plan.lanes().iter().map(Lane::name).collect();
        assert_eq!(names, vec!["io", "gfx", "none"]);
        assert_eq!(
            plan.lane(None).unwrap().schedule.independent(),
            vec![model.tag_named("main").unwrap()]
        );
        Ok(())
    }

    #[test]
    fn test_name_ordering_puts_ungrouped_first() -> ScheduleResult<()> {
        let model = two_lanes()?;
        let config = SchedulerConfig::default().with_lane_ordering(LaneOrdering::Name);
        let mut scheduler = Scheduler::new(config)?;
        let plan = LanePlanner::new(&mut scheduler).plan(&model)?;

        let names: Vec<&str> = plan.lanes().iter().map(Lane::name).collect();
        assert_eq!(names, vec!["none", "gfx", "io"]);
        Ok(())
    }

    #[test]
    fn test_same_priority_in_different_lanes_is_allowed() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("a", Capability::Plain)
            .with_actor("b", Capability::Plain)
            .with_tag("a", SequenceTag::new(1).with_process("left"))
            .with_tag("b", SequenceTag::new(1).with_process("right"))
            .build()?;
        let mut scheduler = Scheduler::default();
        let plan = LanePlanner::new(&mut scheduler).plan(&model)?;
        assert_eq!(plan.len(), 2);
        Ok(())
    }

    #[test]
    fn test_branch_dependents_stay_with_their_control() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("c", Capability::Control(ControlSpec::branching()))
            .with_actor("t", Capability::Plain)
            .with_output("c", "then")
            .with_input("t", "in")
            .with_link("c.then", "t.in")
            .with_tag("c", SequenceTag::new(1).with_process("ctl"))
            .with_tag("t", SequenceTag::new(2))
            .build()?;
        let mut scheduler = Scheduler::default();
        let plan = LanePlanner::new(&mut scheduler).plan(&model)?;

        assert_eq!(plan.len(), 1);
        let lane = plan.lane(Some("ctl")).unwrap();
        assert!(lane
            .schedule
            .branch_table()
            .is_dependent(model.tag_named("t").unwrap()));
        Ok(())
    }

    #[test]
    fn test_unreachable_policy() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("a", Capability::Plain)
            .with_actor("stray", Capability::Plain)
            .with_tag("a", SequenceTag::new(1))
            .build()?;

        let mut strict = Scheduler::default();
        let err = LanePlanner::new(&mut strict).plan(&model).unwrap_err();
        assert_eq!(err, ScheduleError::UnreachableActors(vec!["stray".into()]));

        let config = SchedulerConfig::default().with_unreachable_policy(UnreachablePolicy::Warn);
        let mut lenient = Scheduler::new(config)?;
        let plan = LanePlanner::new(&mut lenient).plan(&model)?;
        assert_eq!(plan.unreachable(), ["stray".to_string()].as_slice());
        Ok(())
    }
}
