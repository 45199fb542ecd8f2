//! Query shapes per operation kind, their prepared (frozen) form and the
//! caches that share prepared shapes between executions.

use crate::builder::ConditionEngine;
use crate::condition::{Container, ContainerRole, FieldPath, OperatorKind, Operand, Parameter};
use crate::error::{ConfigError, ConfigResult};
use crate::graph::ContainerGraph;
use crate::normalize::NormalizedConditionList;
use crate::plan::{StagePlan, StagePlanner};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Select,
    Update,
    Delete,
    SoftDelete,
    Restore,
}

impl OperationKind {
    /// Explicit grouping is a select-only feature; single-container
    /// operations combine their filters with AND/OR only.
    pub fn allows_grouping(&self) -> bool {
        matches!(self, OperationKind::Select)
    }

    pub fn allows_joins(&self) -> bool {
        matches!(self, OperationKind::Select)
    }

    fn unsupported(&self, operation: &str) -> ConfigError {
        ConfigError::UnsupportedOperation {
            kind: self.to_string(),
            operation: operation.to_string(),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Select => write!(f, "select"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::SoftDelete => write!(f, "soft-delete"),
            OperationKind::Restore => write!(f, "restore"),
        }
    }
}

/// Immutable result of preparing a query shape; shared across executions.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    pub kind: OperationKind,
    pub conditions: Arc<NormalizedConditionList>,
    pub plan: StagePlan,
    pub parameters: HashMap<String, Parameter>,
}

impl PreparedQuery {
    pub fn root(&self) -> &Container {
        self.plan.order().root()
    }
}

/// One configured operation: its kind plus the condition engine it owns.
#[derive(Debug, Clone)]
pub struct QueryShape {
    kind: OperationKind,
    engine: ConditionEngine,
    prepared: Option<Arc<PreparedQuery>>,
}

impl QueryShape {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            engine: ConditionEngine::new(),
            prepared: None,
        }
    }

    pub fn select() -> Self {
        Self::new(OperationKind::Select)
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn engine(&self) -> &ConditionEngine {
        &self.engine
    }

    fn touch(&mut self) {
        self.prepared = None;
    }

    pub fn add_container(&mut self, container: Container) -> ConfigResult<&mut Self> {
        if container.role != ContainerRole::Root && !self.kind.allows_joins() {
            return Err(self.kind.unsupported("join"));
        }
        self.touch();
        self.engine.add_container(container)?;
        Ok(self)
    }

    pub fn add_regular_condition(
        &mut self,
        alias: Option<&str>,
        field: FieldPath,
        operator: OperatorKind,
        operand: Operand,
    ) -> ConfigResult<&mut Self> {
        self.touch();
        self.engine
            .add_regular_condition(alias, field, operator, operand)?;
        Ok(self)
    }

    pub fn add_regular_condition_ignore_case(
        &mut self,
        alias: Option<&str>,
        field: FieldPath,
        operator: OperatorKind,
        operand: Operand,
    ) -> ConfigResult<&mut Self> {
        self.touch();
        self.engine
            .add_regular_condition_ignore_case(alias, field, operator, operand)?;
        Ok(self)
    }

    pub fn add_connect_condition(
        &mut self,
        alias: &str,
        field: FieldPath,
        ref_alias: &str,
        ref_field: FieldPath,
        operator: OperatorKind,
    ) -> ConfigResult<&mut Self> {
        if !self.kind.allows_joins() {
            return Err(self.kind.unsupported("connect condition"));
        }
        self.touch();
        self.engine
            .add_connect_condition(alias, field, ref_alias, ref_field, operator)?;
        Ok(self)
    }

    pub fn begin_group(&mut self) -> ConfigResult<&mut Self> {
        if !self.kind.allows_grouping() {
            return Err(self.kind.unsupported("begin_group"));
        }
        self.touch();
        self.engine.begin_group()?;
        Ok(self)
    }

    pub fn end_group(&mut self) -> ConfigResult<&mut Self> {
        if !self.kind.allows_grouping() {
            return Err(self.kind.unsupported("end_group"));
        }
        self.touch();
        self.engine.end_group()?;
        Ok(self)
    }

    pub fn and(&mut self) -> ConfigResult<&mut Self> {
        self.touch();
        self.engine.and()?;
        Ok(self)
    }

    pub fn or(&mut self) -> ConfigResult<&mut Self> {
        self.touch();
        self.engine.or()?;
        Ok(self)
    }

    /// Normalizes, orders containers and plans stages.
    ///
    /// Cached until the next mutation.
    pub fn prepare(&mut self) -> ConfigResult<Arc<PreparedQuery>> {
        if let Some(prepared) = &self.prepared {
            return Ok(Arc::clone(prepared));
        }
        let conditions = self.engine.normalize()?;
        let order = ContainerGraph::order(self.engine.containers(), conditions.connect_conditions())?;
        let plan = StagePlanner::plan(order, &conditions)?;
        let prepared = Arc::new(PreparedQuery {
            kind: self.kind,
            conditions,
            plan,
            parameters: self.engine.parameters().clone(),
        });
        debug!(kind = %self.kind, stages = prepared.plan.stages().len(), "query shape prepared");
        self.prepared = Some(Arc::clone(&prepared));
        Ok(prepared)
    }
}

/// Keyed cache of prepared shapes.
///
/// Shapes are built without holding any lock; when two threads race on the
/// same key the first insert wins and the other result is dropped.
#[derive(Debug)]
pub struct ShapeCache<K: Eq + Hash> {
    entries: DashMap<K, Arc<PreparedQuery>>,
}

impl<K: Eq + Hash> Default for ShapeCache<K> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> ShapeCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<Arc<PreparedQuery>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_or_prepare<F>(&self, key: K, build: F) -> ConfigResult<Arc<PreparedQuery>>
    where
        F: FnOnce() -> ConfigResult<QueryShape>,
    {
        if let Some(hit) = self.get(&key) {
            trace!(?key, "shape cache hit");
            return Ok(hit);
        }
        let prepared = build()?.prepare()?;
        let winner = match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                trace!(key = ?entry.key(), "shape prepared concurrently, keeping the cached one");
                Arc::clone(entry.get())
            }
            Entry::Vacant(entry) => {
                debug!(key = ?entry.key(), "shape cached");
                Arc::clone(entry.insert(prepared).value())
            }
        };
        Ok(winner)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Lazily built, set-once artefact. Concurrent initializers all compute;
/// one result is kept and returned to everybody.
#[derive(Debug)]
pub struct FrozenSlot<T> {
    cell: OnceLock<Arc<T>>,
}

impl<T> Default for FrozenSlot<T> {
    fn default() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }
}

impl<T> FrozenSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    pub fn get_or_try_init<F>(&self, init: F) -> ConfigResult<Arc<T>>
    where
        F: FnOnce() -> ConfigResult<T>,
    {
        if let Some(value) = self.cell.get() {
            return Ok(Arc::clone(value));
        }
        let value = Arc::new(init()?);
        Ok(Arc::clone(self.cell.get_or_init(|| value)))
    }
}
