//! Slicing of the normalized filter list and placement of slices into
//! execution stages.
//!
//! Stage 0 filters the root container; stage `i` joins the container at
//! position `i` of the resolved order. A slice runs at the earliest stage
//! where every container it reads is present.

use crate::condition::{Combinator, Condition, Container, ContainerRole};
use crate::error::{ConfigError, ConfigResult};
use crate::graph::ContainerOrder;
use crate::normalize::{render_flat, NormalizedConditionList};
use std::collections::BTreeSet;
use std::fmt;
use tracing::trace;

/// Contiguous, balanced run of conditions that is AND-connected to its
/// neighbours at the top level.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionSlice {
    conditions: Vec<Condition>,
    aliases: BTreeSet<String>,
}

impl ConditionSlice {
    fn new(conditions: Vec<Condition>) -> Self {
        let aliases = conditions
            .iter()
            .flat_map(Condition::referenced_aliases)
            .map(str::to_string)
            .collect();
        Self {
            conditions,
            aliases,
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Every container read by any condition of the slice.
    pub fn aliases(&self) -> &BTreeSet<String> {
        &self.aliases
    }
}

impl fmt::Display for ConditionSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render_flat(&self.conditions, Condition::label))
    }
}

pub struct ConditionSlicer;

impl ConditionSlicer {
    /// Splits at top-level AND boundaries that follow the last top-level OR,
    /// then merges neighbours reading the same containers.
    ///
    /// Concatenating the slices reproduces the input.
    pub fn slice(conditions: &[Condition]) -> ConfigResult<Vec<ConditionSlice>> {
        let mut boundaries = Vec::new();
        let mut last_or = 0;
        let mut depth: i64 = 0;
        for (index, condition) in conditions.iter().enumerate() {
            if index > 0 && depth == 0 {
                match condition.combinator() {
                    Combinator::And => boundaries.push(index),
                    Combinator::Or => last_or = index,
                }
            }
            depth += i64::from(condition.parentheses_delta());
            if depth < 0 {
                return Err(ConfigError::MalformedEncoding {
                    reason: format!("condition {index} closes a group that was never opened"),
                });
            }
        }
        if depth != 0 {
            return Err(ConfigError::MalformedEncoding {
                reason: "slice input is unbalanced".to_string(),
            });
        }

        let mut slices: Vec<ConditionSlice> = Vec::new();
        let mut start = 0;
        let splits = boundaries.into_iter().filter(|&index| index > last_or);
        for end in splits.chain(std::iter::once(conditions.len())) {
            if start == end {
                continue;
            }
            let slice = ConditionSlice::new(conditions[start..end].to_vec());
            match slices.last_mut() {
                Some(previous) if previous.aliases == slice.aliases => {
                    previous.conditions.extend(slice.conditions);
                }
                _ => slices.push(slice),
            }
            start = end;
        }
        Ok(slices)
    }
}

/// One step of a multi-container pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Container introduced by this stage; `None` for the root filter stage.
    pub container: Option<Container>,
    /// Connect conditions of the introduced container, implicitly AND-ed.
    pub connect: Vec<Condition>,
    pub slices: Vec<ConditionSlice>,
}

impl Stage {
    pub fn join_kind(&self) -> Option<ContainerRole> {
        self.container.as_ref().map(|c| c.role)
    }

    /// All filter conditions of the stage in source order.
    pub fn filter_conditions(&self) -> Vec<Condition> {
        self.slices
            .iter()
            .flat_map(|slice| slice.conditions().iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    order: ContainerOrder,
    stages: Vec<Stage>,
}

impl StagePlan {
    pub fn order(&self) -> &ContainerOrder {
        &self.order
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Every slice in stage order.
    pub fn slices(&self) -> impl Iterator<Item = &ConditionSlice> {
        self.stages.iter().flat_map(|stage| stage.slices.iter())
    }
}

impl fmt::Display for StagePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, stage) in self.stages.iter().enumerate() {
            match &stage.container {
                None => write!(f, "stage {index}: FROM {}", self.order.root().underlying_name)?,
                Some(container) => {
                    write!(
                        f,
                        "stage {index}: {} {} AS {}",
                        container.role, container.underlying_name, container.alias
                    )?;
                    if !stage.connect.is_empty() {
                        let on = stage
                            .connect
                            .iter()
                            .map(Condition::label)
                            .collect::<Vec<_>>()
                            .join(" AND ");
                        write!(f, " ON {on}")?;
                    }
                }
            }
            writeln!(f)?;
            for slice in &stage.slices {
                writeln!(f, "    WHERE {slice}")?;
            }
        }
        Ok(())
    }
}

pub struct StagePlanner;

impl StagePlanner {
    pub fn plan(order: ContainerOrder, normalized: &NormalizedConditionList) -> ConfigResult<StagePlan> {
        let mut stages: Vec<Stage> = order
            .containers()
            .iter()
            .enumerate()
            .map(|(index, container)| Stage {
                container: (index > 0).then(|| container.clone()),
                connect: normalized.connect_for(&container.alias).cloned().collect(),
                slices: Vec::new(),
            })
            .collect();

        for slice in ConditionSlicer::slice(normalized.conditions())? {
            let mut stage = 0;
            for alias in slice.aliases() {
                let index = order.index_of(alias).ok_or_else(|| ConfigError::UnknownContainer {
                    alias: alias.clone(),
                })?;
                stage = stage.max(index);
            }
            trace!(stage, slice = %slice, "slice placed");
            stages[stage].slices.push(slice);
        }

        Ok(StagePlan { order, stages })
    }
}
