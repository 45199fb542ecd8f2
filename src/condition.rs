//! Value records of the engine: conditions, containers, field paths and parameters.
//!
//! All of them are immutable once built. The builder replaces a condition with
//! [`Condition::with_delta`] instead of mutating it.

use crate::error::{ConfigError, ConfigResult};
use crate::value::{FieldType, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relation of a condition to the condition before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combinator {
    And,
    Or,
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combinator::And => write!(f, "AND"),
            Combinator::Or => write!(f, "OR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    IsNull,
    IsNotNull,
    In,
    NotIn,
    Like,
    NotLike,
    BitsAnd,
    BitsOr,
    Between,
    NotBetween,
}

impl OperatorKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            OperatorKind::Equal => "=",
            OperatorKind::NotEqual => "!=",
            OperatorKind::Greater => ">",
            OperatorKind::GreaterOrEqual => ">=",
            OperatorKind::Less => "<",
            OperatorKind::LessOrEqual => "<=",
            OperatorKind::IsNull => "IS NULL",
            OperatorKind::IsNotNull => "IS NOT NULL",
            OperatorKind::In => "IN",
            OperatorKind::NotIn => "NOT IN",
            OperatorKind::Like => "LIKE",
            OperatorKind::NotLike => "NOT LIKE",
            OperatorKind::BitsAnd => "BITS ALL",
            OperatorKind::BitsOr => "BITS ANY",
            OperatorKind::Between => "BETWEEN",
            OperatorKind::NotBetween => "NOT BETWEEN",
        }
    }

    /// `IsNull`/`IsNotNull` are the only operators without an operand.
    pub fn takes_operand(&self) -> bool {
        !matches!(self, OperatorKind::IsNull | OperatorKind::IsNotNull)
    }

    /// Operators allowed between two fields (connect conditions and
    /// cross-container regular conditions).
    pub fn allows_field_operand(&self) -> bool {
        matches!(
            self,
            OperatorKind::Equal
                | OperatorKind::NotEqual
                | OperatorKind::Greater
                | OperatorKind::GreaterOrEqual
                | OperatorKind::Less
                | OperatorKind::LessOrEqual
                | OperatorKind::In
                | OperatorKind::NotIn
                | OperatorKind::BitsAnd
                | OperatorKind::BitsOr
        )
    }

    pub fn allows_case_insensitive(&self) -> bool {
        matches!(
            self,
            OperatorKind::Equal
                | OperatorKind::NotEqual
                | OperatorKind::In
                | OperatorKind::NotIn
                | OperatorKind::Like
                | OperatorKind::NotLike
        )
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// One segment of a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Ordered, non-empty list of field descriptors; more than one segment
/// addresses a field inside embedded records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<FieldDescriptor>,
}

impl FieldPath {
    pub fn single(descriptor: FieldDescriptor) -> Self {
        Self {
            segments: vec![descriptor],
        }
    }

    pub fn nested(segments: Vec<FieldDescriptor>) -> ConfigResult<Self> {
        if segments.is_empty() {
            return Err(ConfigError::Schema("field path must not be empty".to_string()));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[FieldDescriptor] {
        &self.segments
    }

    pub fn leaf(&self) -> &FieldDescriptor {
        // non-empty by construction
        &self.segments[self.segments.len() - 1]
    }

    pub fn field_type(&self) -> &FieldType {
        &self.leaf().field_type
    }

    /// A nested field is nullable when the field or any enclosing record is.
    pub fn is_nullable(&self) -> bool {
        self.segments.iter().any(|segment| segment.nullable)
    }

    pub fn dotted_name(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dotted_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterDirection {
    Input,
    Output,
    InputOutput,
}

/// Named placeholder whose value is bound at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub direction: ParameterDirection,
}

impl Parameter {
    pub fn input(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            direction: ParameterDirection::Input,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A field of a named container.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    pub alias: String,
    pub path: FieldPath,
}

impl FieldRef {
    pub fn new(alias: impl Into<String>, path: FieldPath) -> Self {
        Self {
            alias: alias.into(),
            path,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Literal,
    Parameter,
    FieldRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Literal(Value),
    Parameter(Parameter),
    Field(FieldRef),
}

impl Operand {
    pub fn literal(value: impl Into<Value>) -> Self {
        Operand::Literal(value.into())
    }

    pub fn field(alias: impl Into<String>, path: FieldPath) -> Self {
        Operand::Field(FieldRef::new(alias, path))
    }

    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::None => OperandKind::None,
            Operand::Literal(_) => OperandKind::Literal,
            Operand::Parameter(_) => OperandKind::Parameter,
            Operand::Field(_) => OperandKind::FieldRef,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::Parameter(parameter) => write!(f, ":{}", parameter.name),
            Operand::Field(field) => write!(f, "{field}"),
        }
    }
}

/// One leaf predicate plus its place in the flat boolean encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    container_alias: String,
    field: FieldPath,
    operator: OperatorKind,
    operand: Operand,
    case_insensitive: bool,
    combinator: Combinator,
    parentheses_delta: i32,
    is_connect: bool,
}

impl Condition {
    pub fn regular(
        container_alias: impl Into<String>,
        field: FieldPath,
        operator: OperatorKind,
        operand: Operand,
        combinator: Combinator,
    ) -> Self {
        Self {
            container_alias: container_alias.into(),
            field,
            operator,
            operand,
            case_insensitive: false,
            combinator,
            parentheses_delta: 0,
            is_connect: false,
        }
    }

    /// Join predicate; always AND-connected and never grouped.
    pub fn connect(
        container_alias: impl Into<String>,
        field: FieldPath,
        operator: OperatorKind,
        reference: FieldRef,
    ) -> Self {
        Self {
            container_alias: container_alias.into(),
            field,
            operator,
            operand: Operand::Field(reference),
            case_insensitive: false,
            combinator: Combinator::And,
            parentheses_delta: 0,
            is_connect: true,
        }
    }

    pub fn ignoring_case(self) -> Self {
        Self {
            case_insensitive: true,
            ..self
        }
    }

    /// Copy of this condition with a different parentheses delta.
    pub fn with_delta(&self, parentheses_delta: i32) -> Self {
        Self {
            parentheses_delta,
            ..self.clone()
        }
    }

    pub fn container_alias(&self) -> &str {
        &self.container_alias
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> OperatorKind {
        self.operator
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    pub fn operand_kind(&self) -> OperandKind {
        self.operand.kind()
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    pub fn parentheses_delta(&self) -> i32 {
        self.parentheses_delta
    }

    pub fn is_connect(&self) -> bool {
        self.is_connect
    }

    pub fn ref_container_alias(&self) -> Option<&str> {
        match &self.operand {
            Operand::Field(reference) => Some(&reference.alias),
            _ => None,
        }
    }

    pub fn ref_field_path(&self) -> Option<&FieldPath> {
        match &self.operand {
            Operand::Field(reference) => Some(&reference.path),
            _ => None,
        }
    }

    /// Aliases of every container this condition reads.
    pub fn referenced_aliases(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.container_alias.as_str()).chain(self.ref_container_alias())
    }

    /// Human readable predicate without combinator or parentheses.
    pub fn label(&self) -> String {
        let operator = if self.case_insensitive {
            format!("{} CI", self.operator)
        } else {
            self.operator.to_string()
        };
        match &self.operand {
            Operand::None => format!("{}.{} {}", self.container_alias, self.field, operator),
            operand => format!("{}.{} {} {}", self.container_alias, self.field, operator, operand),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerRole {
    Root,
    Join,
    LeftJoin,
    CrossJoin,
}

impl fmt::Display for ContainerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerRole::Root => write!(f, "ROOT"),
            ContainerRole::Join => write!(f, "JOIN"),
            ContainerRole::LeftJoin => write!(f, "LEFT JOIN"),
            ContainerRole::CrossJoin => write!(f, "CROSS JOIN"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    #[default]
    Table,
    View,
}

/// One data source (table, view or collection) of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Container {
    pub alias: String,
    pub underlying_name: String,
    pub role: ContainerRole,
    pub kind: ContainerKind,
}

impl Container {
    fn with_role(underlying_name: impl Into<String>, role: ContainerRole) -> Self {
        let underlying_name = underlying_name.into();
        Self {
            alias: underlying_name.clone(),
            underlying_name,
            role,
            kind: ContainerKind::Table,
        }
    }

    pub fn root(underlying_name: impl Into<String>) -> Self {
        Self::with_role(underlying_name, ContainerRole::Root)
    }

    pub fn join(underlying_name: impl Into<String>) -> Self {
        Self::with_role(underlying_name, ContainerRole::Join)
    }

    pub fn left_join(underlying_name: impl Into<String>) -> Self {
        Self::with_role(underlying_name, ContainerRole::LeftJoin)
    }

    pub fn cross_join(underlying_name: impl Into<String>) -> Self {
        Self::with_role(underlying_name, ContainerRole::CrossJoin)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn view(mut self) -> Self {
        self.kind = ContainerKind::View;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> FieldPath {
        FieldPath::single(FieldDescriptor::new("Status", FieldType::Text))
    }

    #[test]
    fn test_with_delta_leaves_original_untouched() {
        let condition = Condition::regular(
            "o",
            status(),
            OperatorKind::Equal,
            Operand::literal("Open"),
            Combinator::And,
        );
        let opened = condition.with_delta(2);
        assert_eq!(condition.parentheses_delta(), 0);
        assert_eq!(opened.parentheses_delta(), 2);
        assert_eq!(opened.label(), condition.label());
    }

    #[test]
    fn test_connect_condition_references() {
        let id = FieldPath::single(FieldDescriptor::new("Id", FieldType::Int64));
        let condition = Condition::connect(
            "c",
            id.clone(),
            OperatorKind::Equal,
            FieldRef::new("o", id),
        );
        assert!(condition.is_connect());
        assert_eq!(condition.ref_container_alias(), Some("o"));
        assert_eq!(condition.referenced_aliases().collect::<Vec<_>>(), vec!["c", "o"]);
        assert_eq!(condition.label(), "c.Id = o.Id");
    }

    #[test]
    fn test_nested_path_nullability() {
        let path = FieldPath::nested(vec![
            FieldDescriptor::new("Address", FieldType::Embedded).nullable(),
            FieldDescriptor::new("City", FieldType::Text),
        ])
        .unwrap();
        assert!(path.is_nullable());
        assert_eq!(path.dotted_name(), "Address.City");
        assert!(FieldPath::nested(vec![]).is_err());
    }

    #[test]
    fn test_field_operator_subset() {
        assert!(OperatorKind::BitsAnd.allows_field_operand());
        assert!(!OperatorKind::Like.allows_field_operand());
        assert!(!OperatorKind::IsNull.allows_field_operand());
        assert!(!OperatorKind::Between.allows_field_operand());
    }
}
