//! Validation and freezing of the builder's condition streams.

use crate::condition::Condition;
use crate::error::{ConfigError, ConfigResult};
use std::fmt;

/// Builder state handed over for validation.
pub(crate) struct Normalizer<'a> {
    pub(crate) conditions: &'a [Condition],
    pub(crate) connect: &'a [Condition],
    pub(crate) pending_combinator: bool,
    pub(crate) unclosed_groups: usize,
    /// Synthetic group still open at the top level.
    pub(crate) auto_opened: u8,
}

impl Normalizer<'_> {
    /// Closes a pending top-level auto group on a copy of the list and
    /// validates the result. The builder's own list is left untouched.
    pub(crate) fn run(self) -> ConfigResult<NormalizedConditionList> {
        if self.pending_combinator {
            return Err(ConfigError::DanglingCombinator);
        }
        if self.unclosed_groups > 0 {
            return Err(ConfigError::UnclosedGroup {
                open: self.unclosed_groups,
            });
        }
        let mut conditions = self.conditions.to_vec();
        match self.auto_opened {
            0 => {}
            1 => {
                let Some(last) = conditions.last_mut() else {
                    return Err(ConfigError::AutoParenthesisCorrupted {
                        reason: "auto group open on an empty list".to_string(),
                    });
                };
                *last = last.with_delta(last.parentheses_delta() - 1);
            }
            n => {
                return Err(ConfigError::AutoParenthesisCorrupted {
                    reason: format!("{n} auto groups open at the top level"),
                })
            }
        }
        NormalizedConditionList::new(conditions, self.connect.to_vec())
    }
}

/// Checks the delta encoding: every prefix sum is non-negative and the total is zero.
pub fn validate_balance(conditions: &[Condition]) -> ConfigResult<()> {
    let mut depth: i64 = 0;
    for (index, condition) in conditions.iter().enumerate() {
        depth += i64::from(condition.parentheses_delta());
        if depth < 0 {
            return Err(ConfigError::MalformedEncoding {
                reason: format!("condition {index} closes a group that was never opened"),
            });
        }
    }
    if depth != 0 {
        return Err(ConfigError::MalformedEncoding {
            reason: format!("{depth} group(s) left open at the end of the list"),
        });
    }
    Ok(())
}

fn validate_connect(connect: &[Condition]) -> ConfigResult<()> {
    for condition in connect {
        let Some(reference) = condition.ref_container_alias() else {
            return Err(ConfigError::MalformedEncoding {
                reason: format!("connect condition {} has no reference container", condition.label()),
            });
        };
        if reference == condition.container_alias() {
            return Err(ConfigError::SelfReferencingConnect {
                alias: condition.container_alias().to_string(),
            });
        }
        if !condition.is_connect() || condition.parentheses_delta() != 0 {
            return Err(ConfigError::MalformedEncoding {
                reason: format!("{} is not a plain connect condition", condition.label()),
            });
        }
    }
    Ok(())
}

/// Frozen, render-ready regular and connect condition streams.
///
/// Shared behind an `Arc` and read concurrently by every execution of the
/// query shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedConditionList {
    conditions: Vec<Condition>,
    connect: Vec<Condition>,
}

impl NormalizedConditionList {
    /// Validates an already closed encoding.
    pub fn new(conditions: Vec<Condition>, connect: Vec<Condition>) -> ConfigResult<Self> {
        validate_balance(&conditions)?;
        validate_connect(&connect)?;
        Ok(Self {
            conditions,
            connect,
        })
    }

    /// Regular (filter) conditions.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn connect_conditions(&self) -> &[Condition] {
        &self.connect
    }

    /// Connect conditions whose own container is `alias`.
    pub fn connect_for<'a>(&'a self, alias: &'a str) -> impl Iterator<Item = &'a Condition> + 'a {
        self.connect
            .iter()
            .filter(move |condition| condition.container_alias() == alias)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Flat infix form with explicit parentheses, leaves printed by `label`.
    pub fn render_flat(&self, label: impl Fn(&Condition) -> String) -> String {
        render_flat(&self.conditions, label)
    }
}

pub fn render_flat(conditions: &[Condition], label: impl Fn(&Condition) -> String) -> String {
    let mut out = String::new();
    for (index, condition) in conditions.iter().enumerate() {
        if index > 0 {
            out.push(' ');
            out.push_str(&condition.combinator().to_string());
            out.push(' ');
        }
        let delta = condition.parentheses_delta();
        for _ in 0..delta.max(0) {
            out.push('(');
        }
        out.push_str(&label(condition));
        for _ in 0..(-delta).max(0) {
            out.push(')');
        }
    }
    out
}

impl fmt::Display for NormalizedConditionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_flat(Condition::label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Combinator, FieldDescriptor, FieldPath, Operand, OperatorKind};
    use crate::value::FieldType;

    fn cond(name: &str, combinator: Combinator, delta: i32) -> Condition {
        Condition::regular(
            "t",
            FieldPath::single(FieldDescriptor::new(name, FieldType::Int32)),
            OperatorKind::Equal,
            Operand::literal(1),
            combinator,
        )
        .with_delta(delta)
    }

    fn name(condition: &Condition) -> String {
        condition.field().dotted_name()
    }

    #[test]
    fn test_balance_rejects_negative_prefix_and_open_tail() {
        let negative = vec![cond("a", Combinator::And, -1), cond("b", Combinator::And, 1)];
        assert!(matches!(
            validate_balance(&negative),
            Err(ConfigError::MalformedEncoding { .. })
        ));
        let open = vec![cond("a", Combinator::And, 1), cond("b", Combinator::And, 0)];
        assert!(validate_balance(&open).is_err());
        let fine = vec![cond("a", Combinator::And, 1), cond("b", Combinator::And, -1)];
        assert!(validate_balance(&fine).is_ok());
    }

    #[test]
    fn test_normalizer_closes_top_level_auto_group_on_copy() {
        let conditions = vec![
            cond("a", Combinator::And, 0),
            cond("b", Combinator::Or, 1),
            cond("c", Combinator::And, 0),
        ];
        let normalized = Normalizer {
            conditions: &conditions,
            connect: &[],
            pending_combinator: false,
            unclosed_groups: 0,
            auto_opened: 1,
        }
        .run()
        .unwrap();
        assert_eq!(normalized.render_flat(name), "a OR (b AND c)");
        assert_eq!(conditions[2].parentheses_delta(), 0);
    }

    #[test]
    fn test_normalizer_structural_errors() {
        let conditions = vec![cond("a", Combinator::And, 0)];
        let base = |pending_combinator, unclosed_groups, auto_opened| Normalizer {
            conditions: &conditions,
            connect: &[],
            pending_combinator,
            unclosed_groups,
            auto_opened,
        };
        assert_eq!(base(true, 0, 0).run().unwrap_err(), ConfigError::DanglingCombinator);
        assert_eq!(
            base(false, 2, 0).run().unwrap_err(),
            ConfigError::UnclosedGroup { open: 2 }
        );
        assert!(matches!(
            base(false, 0, 2).run(),
            Err(ConfigError::AutoParenthesisCorrupted { .. })
        ));
    }

    #[test]
    fn test_display_uses_labels() {
        let list = NormalizedConditionList::new(
            vec![
                cond("a", Combinator::And, 1),
                cond("b", Combinator::And, -1),
                cond("c", Combinator::Or, 0),
            ],
            vec![],
        )
        .unwrap();
        assert_eq!(list.to_string(), "(t.a = 1 AND t.b = 1) OR t.c = 1");
    }
}
