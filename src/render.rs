//! Leaf rendering: one condition plus its resolved operand becomes a
//! backend-neutral [`Predicate`].
//!
//! Operand shapes were checked when the condition was added; types and
//! nullability are checked here because parameter values are only known at
//! execution time.

use crate::condition::{Condition, Container, FieldPath, Operand, OperatorKind};
use crate::error::{ConfigError, ConfigResult};
use crate::schema::{FieldResolver, StorageName};
use crate::value::Value;
use std::collections::HashMap;

/// Execution-time values of named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterValues {
    values: HashMap<String, Value>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

impl FromIterator<(String, Value)> for ParameterValues {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// A resolved field: container alias plus storage name.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub alias: String,
    pub storage: StorageName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn from_operator(operator: OperatorKind) -> Option<Self> {
        match operator {
            OperatorKind::Equal => Some(CompareOp::Eq),
            OperatorKind::NotEqual => Some(CompareOp::Ne),
            OperatorKind::Greater => Some(CompareOp::Gt),
            OperatorKind::GreaterOrEqual => Some(CompareOp::Ge),
            OperatorKind::Less => Some(CompareOp::Lt),
            OperatorKind::LessOrEqual => Some(CompareOp::Le),
            _ => None,
        }
    }
}

/// `BitsAnd` tests that every mask bit is set, `BitsOr` that any is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitsMode {
    All,
    Any,
}

/// Backend-neutral leaf predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: Value,
        case_insensitive: bool,
    },
    Null {
        column: ColumnRef,
        negated: bool,
    },
    Membership {
        column: ColumnRef,
        values: Vec<Value>,
        negated: bool,
        case_insensitive: bool,
    },
    Pattern {
        column: ColumnRef,
        pattern: String,
        negated: bool,
        case_insensitive: bool,
    },
    Bits {
        column: ColumnRef,
        mask: i64,
        mode: BitsMode,
    },
    Range {
        column: ColumnRef,
        low: Value,
        high: Value,
        negated: bool,
    },
    FieldCompare {
        column: ColumnRef,
        operator: OperatorKind,
        other: ColumnRef,
    },
}

impl Predicate {
    pub fn column(&self) -> &ColumnRef {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::Null { column, .. }
            | Predicate::Membership { column, .. }
            | Predicate::Pattern { column, .. }
            | Predicate::Bits { column, .. }
            | Predicate::Range { column, .. }
            | Predicate::FieldCompare { column, .. } => column,
        }
    }
}

pub struct ConditionRenderer<'a> {
    containers: &'a [Container],
    resolver: &'a dyn FieldResolver,
    values: &'a ParameterValues,
}

impl<'a> ConditionRenderer<'a> {
    pub fn new(
        containers: &'a [Container],
        resolver: &'a dyn FieldResolver,
        values: &'a ParameterValues,
    ) -> Self {
        Self {
            containers,
            resolver,
            values,
        }
    }

    pub fn container(&self, alias: &str) -> ConfigResult<&'a Container> {
        self.containers
            .iter()
            .find(|container| container.alias == alias)
            .ok_or_else(|| ConfigError::UnknownContainer {
                alias: alias.to_string(),
            })
    }

    pub fn column(&self, alias: &str, path: &FieldPath) -> ConfigResult<ColumnRef> {
        let container = self.container(alias)?;
        Ok(ColumnRef {
            alias: container.alias.clone(),
            storage: self.resolver.resolve(container, path)?,
        })
    }

    pub fn render(&self, condition: &Condition) -> ConfigResult<Predicate> {
        let column = self.column(condition.container_alias(), condition.field())?;
        let operator = condition.operator();
        match condition.operand() {
            Operand::Field(reference) => {
                if !operator.allows_field_operand() {
                    return Err(ConfigError::InvalidFieldComparison {
                        operator: operator.to_string(),
                    });
                }
                let own = condition.field().field_type();
                let other = reference.path.field_type();
                if !own.accepts_type(other) && !other.accepts_type(own) {
                    return Err(ConfigError::TypeMismatch {
                        field: qualified(condition),
                        expected: own.to_string(),
                        found: other.to_string(),
                    });
                }
                if matches!(operator, OperatorKind::BitsAnd | OperatorKind::BitsOr)
                    && !own.is_integer()
                {
                    return Err(invalid(condition, "bit tests need an integer field"));
                }
                Ok(Predicate::FieldCompare {
                    column,
                    operator,
                    other: self.column(&reference.alias, &reference.path)?,
                })
            }
            Operand::None => match operator {
                OperatorKind::IsNull => Ok(Predicate::Null {
                    column,
                    negated: false,
                }),
                OperatorKind::IsNotNull => Ok(Predicate::Null {
                    column,
                    negated: true,
                }),
                _ => Err(invalid(condition, "operand is missing")),
            },
            Operand::Literal(value) => render_value(condition, column, value.clone()),
            Operand::Parameter(parameter) => {
                let value = self.values.get(&parameter.name).ok_or_else(|| {
                    ConfigError::UnboundParameter {
                        name: parameter.name.clone(),
                    }
                })?;
                let field_type = condition.field().field_type();
                if !field_type.accepts_type(&parameter.field_type) {
                    return Err(ConfigError::TypeMismatch {
                        field: qualified(condition),
                        expected: field_type.to_string(),
                        found: format!(":{} {}", parameter.name, parameter.field_type),
                    });
                }
                if value.is_null() && !parameter.nullable {
                    return Err(ConfigError::NullNotAllowed {
                        field: format!(":{}", parameter.name),
                    });
                }
                render_value(condition, column, value.clone())
            }
        }
    }
}

fn qualified(condition: &Condition) -> String {
    format!("{}.{}", condition.container_alias(), condition.field())
}

fn invalid(condition: &Condition, reason: &str) -> ConfigError {
    ConfigError::InvalidOperand {
        field: qualified(condition),
        operator: condition.operator().to_string(),
        reason: reason.to_string(),
    }
}

/// Null and type check of one scalar against the condition's field.
fn check_scalar(condition: &Condition, value: &Value) -> ConfigResult<()> {
    let path = condition.field();
    if value.is_null() {
        if path.is_nullable() {
            return Ok(());
        }
        return Err(ConfigError::NullNotAllowed {
            field: qualified(condition),
        });
    }
    if path.field_type().accepts(value) {
        Ok(())
    } else {
        Err(ConfigError::TypeMismatch {
            field: qualified(condition),
            expected: path.field_type().to_string(),
            found: value.kind_name(),
        })
    }
}

fn check_non_null(condition: &Condition, value: &Value) -> ConfigResult<()> {
    if value.is_null() {
        check_scalar(condition, value)?;
        return Err(invalid(condition, "null is only valid with = and !="));
    }
    check_scalar(condition, value)
}

fn render_value(condition: &Condition, column: ColumnRef, value: Value) -> ConfigResult<Predicate> {
    let operator = condition.operator();
    let field_type = condition.field().field_type();
    let case_insensitive = condition.case_insensitive();

    match operator {
        OperatorKind::Equal
        | OperatorKind::NotEqual
        | OperatorKind::Greater
        | OperatorKind::GreaterOrEqual
        | OperatorKind::Less
        | OperatorKind::LessOrEqual => {
            if matches!(value, Value::List(_) | Value::Range(_, _)) {
                return Err(invalid(condition, "expects a scalar"));
            }
            if value.is_null() {
                check_scalar(condition, &value)?;
                return match operator {
                    OperatorKind::Equal => Ok(Predicate::Null {
                        column,
                        negated: false,
                    }),
                    OperatorKind::NotEqual => Ok(Predicate::Null {
                        column,
                        negated: true,
                    }),
                    _ => Err(invalid(condition, "null is only valid with = and !=")),
                };
            }
            check_scalar(condition, &value)?;
            let Some(op) = CompareOp::from_operator(operator) else {
                return Err(invalid(condition, "not a comparison"));
            };
            Ok(Predicate::Compare {
                column,
                op,
                value,
                case_insensitive,
            })
        }
        OperatorKind::In | OperatorKind::NotIn => {
            let Value::List(values) = value else {
                return Err(invalid(condition, "expects a list"));
            };
            for item in &values {
                check_non_null(condition, item)?;
            }
            Ok(Predicate::Membership {
                column,
                values,
                negated: operator == OperatorKind::NotIn,
                case_insensitive,
            })
        }
        OperatorKind::Like | OperatorKind::NotLike => {
            if !field_type.is_text() {
                return Err(invalid(condition, "pattern match needs a text field"));
            }
            check_non_null(condition, &value)?;
            let Value::Text(pattern) = value else {
                return Err(ConfigError::TypeMismatch {
                    field: qualified(condition),
                    expected: field_type.to_string(),
                    found: value.kind_name(),
                });
            };
            Ok(Predicate::Pattern {
                column,
                pattern,
                negated: operator == OperatorKind::NotLike,
                case_insensitive,
            })
        }
        OperatorKind::BitsAnd | OperatorKind::BitsOr => {
            if !field_type.is_integer() {
                return Err(invalid(condition, "bit tests need an integer field"));
            }
            check_non_null(condition, &value)?;
            let Some(mask) = value.as_i64() else {
                return Err(invalid(condition, "mask must be an integer"));
            };
            let mode = if operator == OperatorKind::BitsAnd {
                BitsMode::All
            } else {
                BitsMode::Any
            };
            Ok(Predicate::Bits { column, mask, mode })
        }
        OperatorKind::Between | OperatorKind::NotBetween => {
            let Value::Range(low, high) = value else {
                return Err(invalid(condition, "expects a range"));
            };
            check_non_null(condition, &low)?;
            check_non_null(condition, &high)?;
            Ok(Predicate::Range {
                column,
                low: *low,
                high: *high,
                negated: operator == OperatorKind::NotBetween,
            })
        }
        OperatorKind::IsNull | OperatorKind::IsNotNull => {
            Err(invalid(condition, "operator takes no operand"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Combinator, FieldDescriptor, Parameter};
    use crate::schema::IdentityResolver;
    use crate::value::FieldType;

    fn path(name: &str, field_type: FieldType, nullable: bool) -> FieldPath {
        let descriptor = FieldDescriptor::new(name, field_type);
        FieldPath::single(if nullable { descriptor.nullable() } else { descriptor })
    }

    fn cond(field: FieldPath, operator: OperatorKind, operand: Operand) -> Condition {
        Condition::regular("o", field, operator, operand, Combinator::And)
    }

    fn render(condition: &Condition, values: &ParameterValues) -> ConfigResult<Predicate> {
        let containers = [Container::root("Orders").alias("o"), Container::join("Customers").alias("c")];
        ConditionRenderer::new(&containers, &IdentityResolver, values).render(condition)
    }

    fn column(name: &str) -> ColumnRef {
        ColumnRef {
            alias: "o".to_string(),
            storage: StorageName(name.to_string()),
        }
    }

    #[test]
    fn test_null_equality_becomes_null_test() {
        let note = path("Note", FieldType::Text, true);
        let eq_null = cond(note.clone(), OperatorKind::NotEqual, Operand::literal(Value::Null));
        assert_eq!(
            render(&eq_null, &ParameterValues::new()).unwrap(),
            Predicate::Null {
                column: column("Note"),
                negated: true
            }
        );

        let status = path("Status", FieldType::Text, false);
        let not_nullable = cond(status, OperatorKind::Equal, Operand::literal(Value::Null));
        assert!(matches!(
            render(&not_nullable, &ParameterValues::new()),
            Err(ConfigError::NullNotAllowed { .. })
        ));

        let greater_null = cond(note, OperatorKind::Greater, Operand::literal(Value::Null));
        assert!(matches!(
            render(&greater_null, &ParameterValues::new()),
            Err(ConfigError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_widening_and_type_mismatch() {
        let total = path("Total", FieldType::Int64, false);
        let widened = cond(total.clone(), OperatorKind::Greater, Operand::literal(100i32));
        assert!(matches!(
            render(&widened, &ParameterValues::new()).unwrap(),
            Predicate::Compare { op: CompareOp::Gt, .. }
        ));
        let text = cond(total, OperatorKind::Equal, Operand::literal("100"));
        assert!(matches!(
            render(&text, &ParameterValues::new()),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_pattern_and_bits_field_types() {
        let total = path("Total", FieldType::Int64, false);
        let like_int = cond(total, OperatorKind::Like, Operand::literal("1%"));
        assert!(matches!(
            render(&like_int, &ParameterValues::new()),
            Err(ConfigError::InvalidOperand { .. })
        ));

        let status = path("Status", FieldType::Text, false);
        let bits_text = cond(status, OperatorKind::BitsAnd, Operand::literal(4));
        assert!(matches!(
            render(&bits_text, &ParameterValues::new()),
            Err(ConfigError::InvalidOperand { .. })
        ));

        let flags = path("Flags", FieldType::Int32, false);
        let bits = cond(flags, OperatorKind::BitsOr, Operand::literal(6));
        assert_eq!(
            render(&bits, &ParameterValues::new()).unwrap(),
            Predicate::Bits {
                column: column("Flags"),
                mask: 6,
                mode: BitsMode::Any
            }
        );
    }

    #[test]
    fn test_parameter_binding() {
        let status = path("Status", FieldType::Text, false);
        let parameter = Parameter::input("status", FieldType::Text);
        let condition = cond(status, OperatorKind::Equal, Operand::Parameter(parameter));

        assert_eq!(
            render(&condition, &ParameterValues::new()).unwrap_err(),
            ConfigError::UnboundParameter {
                name: "status".to_string()
            }
        );
        let bound = ParameterValues::new().bind("status", "Open");
        assert!(matches!(
            render(&condition, &bound).unwrap(),
            Predicate::Compare { value: Value::Text(ref v), .. } if v == "Open"
        ));
        let null = ParameterValues::new().bind("status", Value::Null);
        assert!(matches!(
            render(&condition, &null),
            Err(ConfigError::NullNotAllowed { .. })
        ));
    }

    #[test]
    fn test_membership_and_range() {
        let total = path("Total", FieldType::Int64, false);
        let in_list = cond(total.clone(), OperatorKind::NotIn, Operand::literal(Value::list([1, 2])));
        assert!(matches!(
            render(&in_list, &ParameterValues::new()).unwrap(),
            Predicate::Membership { negated: true, ref values, .. } if values.len() == 2
        ));
        let with_null = cond(
            total.clone(),
            OperatorKind::In,
            Operand::literal(Value::List(vec![Value::Int64(1), Value::Null])),
        );
        assert!(render(&with_null, &ParameterValues::new()).is_err());

        let between = cond(total, OperatorKind::Between, Operand::literal(Value::range(1, 5)));
        assert!(matches!(
            render(&between, &ParameterValues::new()).unwrap(),
            Predicate::Range { negated: false, .. }
        ));
    }

    #[test]
    fn test_field_comparison() {
        let id = path("CustomerId", FieldType::Int64, false);
        let other = path("Id", FieldType::Int64, false);
        let condition = cond(id.clone(), OperatorKind::Equal, Operand::field("c", other));
        let Predicate::FieldCompare { other, .. } = render(&condition, &ParameterValues::new()).unwrap()
        else {
            panic!("expected a field comparison");
        };
        assert_eq!(other.alias, "c");

        let name = path("Name", FieldType::Text, false);
        let mismatch = cond(id, OperatorKind::Equal, Operand::field("c", name));
        assert!(matches!(
            render(&mismatch, &ParameterValues::new()),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }
}
