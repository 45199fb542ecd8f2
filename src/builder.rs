//! Fluent condition builder.
//!
//! Conditions are appended left to right and kept in a flat list where every
//! condition carries a combinator (relation to its predecessor) and a
//! parentheses delta (groups opened before it when positive, groups closed
//! after it when negative). The list is later folded strictly left to right by
//! the tree builder, so operator precedence has to be materialized here as
//! parentheses:
//!
//! ```text
//! a AND b OR c        ->  (a AND b) OR c        OR wraps the AND-run before it
//! a OR b AND c        ->  a OR (b AND c)        AND after an OR auto-opens at b
//! a OR b AND c OR d   ->  a OR (b AND c) OR d   the next OR closes the auto group
//! ```
//!
//! Each nesting level (the top level plus one per explicit `begin_group`)
//! tracks where its operands start and whether a synthetic group is open, so
//! no backward scan over the deltas is needed.

use crate::condition::{
    Combinator, Condition, Container, ContainerRole, FieldPath, FieldRef, Operand, OperatorKind,
    Parameter,
};
use crate::error::{ConfigError, ConfigResult};
use crate::normalize::{NormalizedConditionList, Normalizer};
use crate::value::{FieldType, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Bookkeeping for one nesting level.
#[derive(Debug, Clone, Default)]
struct Level {
    /// Index of the first condition of this level.
    start: usize,
    /// Number of operands (leaves or groups) at this level.
    operands: usize,
    /// Index of the first condition of the most recent operand.
    last_operand_start: usize,
    /// Combinator that joined the most recent operand; `None` for the first one.
    last_combinator: Option<Combinator>,
    /// Synthetic groups opened at this level and not closed yet (0 or 1).
    auto_opened: u8,
}

/// Builds the regular and connect condition streams of one query shape.
///
/// Single owner, no internal locking. The frozen output of [`normalize`]
/// is cached until the next mutation.
///
/// [`normalize`]: ConditionEngine::normalize
#[derive(Debug, Clone)]
pub struct ConditionEngine {
    containers: Vec<Container>,
    conditions: Vec<Condition>,
    connect: Vec<Condition>,
    parameters: HashMap<String, Parameter>,
    levels: Vec<Level>,
    pending_groups: usize,
    pending_combinator: Option<Combinator>,
    frozen: Option<Arc<NormalizedConditionList>>,
}

impl Default for ConditionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionEngine {
    pub fn new() -> Self {
        Self {
            containers: Vec::new(),
            conditions: Vec::new(),
            connect: Vec::new(),
            parameters: HashMap::new(),
            levels: vec![Level::default()],
            pending_groups: 0,
            pending_combinator: None,
            frozen: None,
        }
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn connect_conditions(&self) -> &[Condition] {
        &self.connect
    }

    pub fn parameters(&self) -> &HashMap<String, Parameter> {
        &self.parameters
    }

    /// True while the cached normalized view is still valid.
    pub fn is_normalized(&self) -> bool {
        self.frozen.is_some()
    }

    /// Explicit groups opened and not yet closed, including ones still
    /// waiting for their first condition.
    pub fn open_groups(&self) -> usize {
        self.levels.len() - 1 + self.pending_groups
    }

    pub fn container(&self, alias: &str) -> ConfigResult<&Container> {
        if self.containers.is_empty() {
            return Err(ConfigError::NoContainer);
        }
        self.containers
            .iter()
            .find(|container| container.alias == alias)
            .ok_or_else(|| ConfigError::UnknownContainer {
                alias: alias.to_string(),
            })
    }

    fn touch(&mut self) {
        self.frozen = None;
    }

    pub fn add_container(&mut self, container: Container) -> ConfigResult<&mut Self> {
        if self.containers.iter().any(|c| c.alias == container.alias) {
            return Err(ConfigError::DuplicateContainer {
                alias: container.alias,
            });
        }
        if container.role == ContainerRole::Root {
            if let Some(root) = self.containers.iter().find(|c| c.role == ContainerRole::Root) {
                return Err(ConfigError::MultipleRoots {
                    first: root.alias.clone(),
                    second: container.alias,
                });
            }
        }
        self.touch();
        self.containers.push(container);
        Ok(self)
    }

    /// Alias to use when the caller omitted one: the single container present.
    fn resolve_alias(&self, alias: Option<&str>) -> ConfigResult<String> {
        match alias {
            Some(alias) => self.container(alias).map(|c| c.alias.clone()),
            None => match self.containers.as_slice() {
                [] => Err(ConfigError::NoContainer),
                [only] => Ok(only.alias.clone()),
                many => Err(ConfigError::AmbiguousContainer { count: many.len() }),
            },
        }
    }

    pub fn add_regular_condition(
        &mut self,
        alias: Option<&str>,
        field: FieldPath,
        operator: OperatorKind,
        operand: Operand,
    ) -> ConfigResult<&mut Self> {
        self.push_regular(alias, field, operator, operand, false)
    }

    /// Case-insensitive variant, valid for string equality, membership and
    /// pattern operators only.
    pub fn add_regular_condition_ignore_case(
        &mut self,
        alias: Option<&str>,
        field: FieldPath,
        operator: OperatorKind,
        operand: Operand,
    ) -> ConfigResult<&mut Self> {
        self.push_regular(alias, field, operator, operand, true)
    }

    pub fn add_connect_condition(
        &mut self,
        alias: &str,
        field: FieldPath,
        ref_alias: &str,
        ref_field: FieldPath,
        operator: OperatorKind,
    ) -> ConfigResult<&mut Self> {
        let alias = self.container(alias)?.alias.clone();
        let ref_alias = self.container(ref_alias)?.alias.clone();
        if alias == ref_alias {
            return Err(ConfigError::SelfReferencingConnect { alias });
        }
        if !operator.allows_field_operand() {
            return Err(ConfigError::InvalidFieldComparison {
                operator: operator.to_string(),
            });
        }
        self.touch();
        self.connect.push(Condition::connect(
            alias,
            field,
            operator,
            FieldRef::new(ref_alias, ref_field),
        ));
        Ok(self)
    }

    pub fn begin_group(&mut self) -> ConfigResult<&mut Self> {
        self.touch();
        self.pending_groups += 1;
        Ok(self)
    }

    pub fn end_group(&mut self) -> ConfigResult<&mut Self> {
        if self.pending_combinator.is_some() {
            return Err(ConfigError::DanglingCombinator);
        }
        if self.pending_groups > 0 {
            return Err(ConfigError::EmptyGroup);
        }
        if self.levels.len() < 2 {
            return Err(ConfigError::UnmatchedEndGroup);
        }
        let Some(last) = self.conditions.len().checked_sub(1) else {
            return Err(ConfigError::EmptyGroup);
        };
        let Some(level) = self.levels.pop() else {
            return Err(ConfigError::UnmatchedEndGroup);
        };
        self.touch();
        if level.auto_opened > 0 {
            trace!(index = last, "closing auto-opened group with explicit group");
        }
        shift_delta(&mut self.conditions, last, -1 - i32::from(level.auto_opened));
        Ok(self)
    }

    pub fn and(&mut self) -> ConfigResult<&mut Self> {
        self.set_combinator(Combinator::And)
    }

    pub fn or(&mut self) -> ConfigResult<&mut Self> {
        self.set_combinator(Combinator::Or)
    }

    fn set_combinator(&mut self, combinator: Combinator) -> ConfigResult<&mut Self> {
        if self.pending_combinator.is_some() {
            return Err(ConfigError::RepeatedCombinator);
        }
        if self.pending_groups > 0 || self.current_level().operands == 0 {
            return Err(ConfigError::CombinatorWithoutCondition);
        }
        self.touch();
        self.pending_combinator = Some(combinator);
        Ok(self)
    }

    fn current_level(&self) -> &Level {
        // levels[0] always exists
        &self.levels[self.levels.len() - 1]
    }

    /// Validates and freezes the regular and connect streams.
    ///
    /// Idempotent: without an intervening mutation the same frozen list is
    /// returned.
    pub fn normalize(&mut self) -> ConfigResult<Arc<NormalizedConditionList>> {
        if let Some(frozen) = &self.frozen {
            return Ok(Arc::clone(frozen));
        }
        let normalized = Normalizer {
            conditions: &self.conditions,
            connect: &self.connect,
            pending_combinator: self.pending_combinator.is_some(),
            unclosed_groups: self.open_groups(),
            auto_opened: self.levels[0].auto_opened,
        }
        .run()?;
        debug!(
            conditions = normalized.conditions().len(),
            connect = normalized.connect_conditions().len(),
            "condition list normalized"
        );
        let frozen = Arc::new(normalized);
        self.frozen = Some(Arc::clone(&frozen));
        Ok(frozen)
    }

    fn declare_parameter(&mut self, parameter: &Parameter) -> ConfigResult<()> {
        match self.parameters.get(&parameter.name) {
            Some(existing) if existing != parameter => Err(ConfigError::ConflictingParameter {
                name: parameter.name.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                self.parameters
                    .insert(parameter.name.clone(), parameter.clone());
                Ok(())
            }
        }
    }

    fn check_operand_shape(
        &self,
        alias: &str,
        field: &FieldPath,
        operator: OperatorKind,
        operand: &Operand,
        case_insensitive: bool,
    ) -> ConfigResult<()> {
        let invalid = |reason: &str| ConfigError::InvalidOperand {
            field: format!("{alias}.{field}"),
            operator: operator.to_string(),
            reason: reason.to_string(),
        };

        if *field.field_type() == FieldType::Embedded {
            return Err(invalid("embedded records cannot be compared"));
        }
        if case_insensitive
            && (!operator.allows_case_insensitive()
                || !field.field_type().is_text()
                || matches!(operand, Operand::Field(_)))
        {
            return Err(ConfigError::InvalidCaseInsensitive {
                operator: operator.to_string(),
                field: format!("{alias}.{field}"),
            });
        }

        match (operator.takes_operand(), operand) {
            (false, Operand::None) => Ok(()),
            (false, _) => Err(invalid("operator takes no operand")),
            (true, Operand::None) => Err(invalid("operand is missing")),
            (true, Operand::Field(reference)) => {
                if !operator.allows_field_operand() {
                    return Err(ConfigError::InvalidFieldComparison {
                        operator: operator.to_string(),
                    });
                }
                self.container(&reference.alias).map(|_| ())
            }
            (true, Operand::Literal(value)) => match (operator, value) {
                (OperatorKind::In | OperatorKind::NotIn, Value::List(_)) => Ok(()),
                (OperatorKind::In | OperatorKind::NotIn, _) => Err(invalid("expects a list")),
                (OperatorKind::Between | OperatorKind::NotBetween, Value::Range(_, _)) => Ok(()),
                (OperatorKind::Between | OperatorKind::NotBetween, _) => {
                    Err(invalid("expects a range"))
                }
                (_, Value::List(_) | Value::Range(_, _)) => Err(invalid("expects a scalar")),
                _ => Ok(()),
            },
            (true, Operand::Parameter(_)) => Ok(()),
        }
    }

    fn push_regular(
        &mut self,
        alias: Option<&str>,
        field: FieldPath,
        operator: OperatorKind,
        operand: Operand,
        case_insensitive: bool,
    ) -> ConfigResult<&mut Self> {
        let alias = self.resolve_alias(alias)?;
        self.check_operand_shape(&alias, &field, operator, &operand, case_insensitive)?;
        if let Operand::Parameter(parameter) = &operand {
            self.declare_parameter(parameter)?;
        }
        self.touch();

        let combinator = self.pending_combinator.take().unwrap_or(Combinator::And);
        let index = self.conditions.len();
        let depth = self.levels.len() - 1;
        let level = &mut self.levels[depth];

        if level.operands > 0 {
            match combinator {
                Combinator::Or if level.auto_opened > 0 => {
                    // previous AND-run was auto-grouped after an OR; close it
                    shift_delta(&mut self.conditions, index - 1, -1);
                    level.auto_opened -= 1;
                    trace!(index, "closed auto-opened group before OR");
                }
                Combinator::Or
                    if level.operands >= 2 && level.last_combinator == Some(Combinator::And) =>
                {
                    // the whole level so far is an AND-run; parenthesize it
                    shift_delta(&mut self.conditions, level.start, 1);
                    shift_delta(&mut self.conditions, index - 1, -1);
                    trace!(start = level.start, end = index - 1, "wrapped AND-run before OR");
                }
                Combinator::Or => {}
                Combinator::And => {
                    if level.last_combinator == Some(Combinator::Or) {
                        if level.auto_opened >= 1 {
                            return Err(ConfigError::AutoParenthesisCorrupted {
                                reason: format!("second auto group at depth {depth}"),
                            });
                        }
                        shift_delta(&mut self.conditions, level.last_operand_start, 1);
                        level.auto_opened += 1;
                        trace!(at = level.last_operand_start, "auto-opened group after OR");
                    }
                }
            }
            level.last_combinator = Some(combinator);
        } else {
            level.last_combinator = None;
        }
        level.operands += 1;
        level.last_operand_start = index;

        let opened = self.pending_groups;
        for _ in 0..opened {
            self.levels.push(Level {
                start: index,
                operands: 1,
                last_operand_start: index,
                last_combinator: None,
                auto_opened: 0,
            });
        }
        self.pending_groups = 0;

        let mut condition = Condition::regular(alias, field, operator, operand, combinator);
        if case_insensitive {
            condition = condition.ignoring_case();
        }
        self.conditions.push(condition.with_delta(opened as i32));
        Ok(self)
    }
}

fn shift_delta(conditions: &mut [Condition], index: usize, by: i32) {
    let shifted = conditions[index].with_delta(conditions[index].parentheses_delta() + by);
    conditions[index] = shifted;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::FieldDescriptor;

    fn field(name: &str) -> FieldPath {
        FieldPath::single(FieldDescriptor::new(name, FieldType::Int32))
    }

    fn engine() -> ConditionEngine {
        let mut engine = ConditionEngine::new();
        engine.add_container(Container::root("T")).unwrap();
        engine
    }

    fn add(engine: &mut ConditionEngine, name: &str) {
        engine
            .add_regular_condition(None, field(name), OperatorKind::Equal, Operand::literal(1))
            .unwrap();
    }

    fn deltas(engine: &ConditionEngine) -> Vec<i32> {
        engine
            .conditions()
            .iter()
            .map(|c| c.parentheses_delta())
            .collect()
    }

    #[test]
    fn test_plain_and_run_has_no_parentheses() {
        let mut engine = engine();
        add(&mut engine, "a");
        add(&mut engine, "b");
        add(&mut engine, "c");
        assert_eq!(deltas(&engine), vec![0, 0, 0]);
    }

    #[test]
    fn test_or_after_and_run_wraps_it() {
        let mut engine = engine();
        add(&mut engine, "a");
        add(&mut engine, "b");
        engine.or().unwrap();
        add(&mut engine, "c");
        assert_eq!(deltas(&engine), vec![1, -1, 0]);
        assert_eq!(engine.conditions()[2].combinator(), Combinator::Or);
    }

    #[test]
    fn test_and_after_or_auto_opens_until_next_or() {
        let mut engine = engine();
        add(&mut engine, "a");
        engine.or().unwrap();
        add(&mut engine, "b");
        add(&mut engine, "c");
        assert_eq!(deltas(&engine), vec![0, 1, 0]);
        engine.or().unwrap();
        add(&mut engine, "d");
        assert_eq!(deltas(&engine), vec![0, 1, -1, 0]);
    }

    #[test]
    fn test_end_group_consumes_pending_auto_group() {
        let mut engine = engine();
        engine.begin_group().unwrap();
        add(&mut engine, "a");
        engine.or().unwrap();
        add(&mut engine, "b");
        add(&mut engine, "c");
        engine.end_group().unwrap();
        assert_eq!(deltas(&engine), vec![1, 1, -2]);
    }

    #[test]
    fn test_combinator_misuse() {
        let mut engine = engine();
        assert_eq!(engine.or().unwrap_err(), ConfigError::CombinatorWithoutCondition);
        add(&mut engine, "a");
        engine.or().unwrap();
        assert_eq!(engine.and().unwrap_err(), ConfigError::RepeatedCombinator);
        assert_eq!(engine.end_group().unwrap_err(), ConfigError::DanglingCombinator);
        add(&mut engine, "b");
        engine.begin_group().unwrap();
        assert_eq!(engine.or().unwrap_err(), ConfigError::CombinatorWithoutCondition);
    }

    #[test]
    fn test_group_misuse() {
        let mut engine = engine();
        assert_eq!(engine.end_group().unwrap_err(), ConfigError::UnmatchedEndGroup);
        engine.begin_group().unwrap();
        assert_eq!(engine.end_group().unwrap_err(), ConfigError::EmptyGroup);
        add(&mut engine, "a");
        assert_eq!(engine.open_groups(), 1);
        engine.end_group().unwrap();
        assert_eq!(engine.end_group().unwrap_err(), ConfigError::UnmatchedEndGroup);
    }

    #[test]
    fn test_alias_resolution() {
        let mut empty = ConditionEngine::new();
        let result =
            empty.add_regular_condition(None, field("a"), OperatorKind::Equal, Operand::literal(1));
        assert_eq!(result.unwrap_err(), ConfigError::NoContainer);

        let mut engine = engine();
        engine.add_container(Container::join("U")).unwrap();
        let result =
            engine.add_regular_condition(None, field("a"), OperatorKind::Equal, Operand::literal(1));
        assert_eq!(result.unwrap_err(), ConfigError::AmbiguousContainer { count: 2 });
        let result = engine.add_regular_condition(
            Some("V"),
            field("a"),
            OperatorKind::Equal,
            Operand::literal(1),
        );
        assert!(matches!(result, Err(ConfigError::UnknownContainer { .. })));
    }

    #[test]
    fn test_duplicate_alias_and_second_root() {
        let mut engine = engine();
        assert!(matches!(
            engine.add_container(Container::join("T")),
            Err(ConfigError::DuplicateContainer { .. })
        ));
        assert!(matches!(
            engine.add_container(Container::root("Other")),
            Err(ConfigError::MultipleRoots { .. })
        ));
    }

    #[test]
    fn test_operand_shape_checks() {
        let mut engine = engine();
        let is_null_with_operand =
            engine.add_regular_condition(None, field("a"), OperatorKind::IsNull, Operand::literal(1));
        assert!(matches!(is_null_with_operand, Err(ConfigError::InvalidOperand { .. })));

        let in_scalar =
            engine.add_regular_condition(None, field("a"), OperatorKind::In, Operand::literal(1));
        assert!(matches!(in_scalar, Err(ConfigError::InvalidOperand { .. })));

        let like_field = engine.add_regular_condition(
            None,
            field("a"),
            OperatorKind::Like,
            Operand::field("T", field("b")),
        );
        assert!(matches!(like_field, Err(ConfigError::InvalidFieldComparison { .. })));

        let unknown_ref = engine.add_regular_condition(
            None,
            field("a"),
            OperatorKind::Equal,
            Operand::field("X", field("b")),
        );
        assert!(matches!(unknown_ref, Err(ConfigError::UnknownContainer { .. })));

        let ci_on_int = engine.add_regular_condition_ignore_case(
            None,
            field("a"),
            OperatorKind::Equal,
            Operand::literal(1),
        );
        assert!(matches!(ci_on_int, Err(ConfigError::InvalidCaseInsensitive { .. })));
        assert!(engine.conditions().is_empty());
    }

    #[test]
    fn test_conflicting_parameter_redeclaration() {
        let mut engine = engine();
        let status = Parameter::input("status", FieldType::Int32);
        engine
            .add_regular_condition(None, field("a"), OperatorKind::Equal, Operand::Parameter(status.clone()))
            .unwrap();
        engine
            .add_regular_condition(None, field("b"), OperatorKind::Equal, Operand::Parameter(status))
            .unwrap();
        let redeclarations = [
            Parameter::input("status", FieldType::Int32).nullable(),
            Parameter::input("status", FieldType::Int64),
            Parameter {
                direction: crate::condition::ParameterDirection::Output,
                ..Parameter::input("status", FieldType::Int32)
            },
        ];
        for redeclared in redeclarations {
            let conflicting = engine.add_regular_condition(
                None,
                field("c"),
                OperatorKind::Equal,
                Operand::Parameter(redeclared),
            );
            assert_eq!(
                conflicting.unwrap_err(),
                ConfigError::ConflictingParameter {
                    name: "status".to_string()
                }
            );
        }
        assert_eq!(engine.conditions().len(), 2);
        assert_eq!(engine.parameters()["status"], Parameter::input("status", FieldType::Int32));
    }

    #[test]
    fn test_connect_condition_validation() {
        let mut engine = engine();
        engine.add_container(Container::join("U")).unwrap();
        assert!(matches!(
            engine.add_connect_condition("U", field("id"), "U", field("id"), OperatorKind::Equal),
            Err(ConfigError::SelfReferencingConnect { .. })
        ));
        assert!(matches!(
            engine.add_connect_condition("U", field("id"), "T", field("id"), OperatorKind::Like),
            Err(ConfigError::InvalidFieldComparison { .. })
        ));
        engine
            .add_connect_condition("U", field("t_id"), "T", field("id"), OperatorKind::Equal)
            .unwrap();
        assert_eq!(engine.connect_conditions().len(), 1);
        assert!(engine.conditions().is_empty());
    }

    #[test]
    fn test_mutation_invalidates_frozen_view() {
        let mut engine = engine();
        add(&mut engine, "a");
        let first = engine.normalize().unwrap();
        assert!(engine.is_normalized());
        let again = engine.normalize().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        add(&mut engine, "b");
        assert!(!engine.is_normalized());
        let refreshed = engine.normalize().unwrap();
        assert_eq!(refreshed.conditions().len(), 2);
    }
}
