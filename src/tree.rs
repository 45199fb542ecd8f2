//! Reconstruction of a nested AND/OR structure from the flat delta encoding.
//!
//! The flat list is folded strictly left to right; precedence has already been
//! materialized as parentheses by the builder. The same descent drives every
//! backend through [`PredicateAlgebra`].

use crate::condition::{Combinator, Condition};
use crate::error::{ConfigError, ConfigResult};
use std::fmt;

/// Target structure of a tree build: how leaves are produced and how two
/// operands are combined.
pub trait PredicateAlgebra {
    type Output;

    fn leaf(&mut self, condition: &Condition) -> ConfigResult<Self::Output>;

    fn combine_by_and(&mut self, left: Self::Output, right: Self::Output) -> Self::Output;

    fn combine_by_or(&mut self, left: Self::Output, right: Self::Output) -> Self::Output;
}

/// Recursive descent over a balanced condition list or a contiguous slice of one.
pub struct TreeBuilder<'a, A: PredicateAlgebra> {
    items: &'a [Condition],
    pos: usize,
    algebra: &'a mut A,
}

impl<'a, A: PredicateAlgebra> TreeBuilder<'a, A> {
    /// Builds the tree of `items`; `None` for an empty list.
    pub fn build(items: &'a [Condition], algebra: &'a mut A) -> ConfigResult<Option<A::Output>> {
        let Some(first) = items.first() else {
            return Ok(None);
        };
        let mut builder = TreeBuilder {
            items,
            pos: 0,
            algebra,
        };
        let (tree, closes) = builder.sequence(opens_of(first))?;
        if closes != 0 {
            return Err(ConfigError::MalformedEncoding {
                reason: format!("{closes} group(s) closed beyond the top level"),
            });
        }
        Ok(Some(tree))
    }

    /// Folds operands until a group closes or the input ends.
    /// Returns the folded value and the number of closes still to propagate.
    fn sequence(&mut self, first_opens: usize) -> ConfigResult<(A::Output, usize)> {
        let items = self.items;
        let (mut acc, mut closes) = self.operand(first_opens)?;
        while closes == 0 && self.pos < items.len() {
            let next = &items[self.pos];
            let combinator = next.combinator();
            let (rhs, rhs_closes) = self.operand(opens_of(next))?;
            acc = match combinator {
                Combinator::And => self.algebra.combine_by_and(acc, rhs),
                Combinator::Or => self.algebra.combine_by_or(acc, rhs),
            };
            closes = rhs_closes;
        }
        Ok((acc, closes))
    }

    fn operand(&mut self, opens: usize) -> ConfigResult<(A::Output, usize)> {
        if opens > 0 {
            let (inner, closes) = self.sequence(opens - 1)?;
            if closes == 0 {
                return Err(ConfigError::MalformedEncoding {
                    reason: "group is never closed".to_string(),
                });
            }
            return Ok((inner, closes - 1));
        }
        let Some(condition) = self.items.get(self.pos) else {
            return Err(ConfigError::MalformedEncoding {
                reason: "list ends inside an operand".to_string(),
            });
        };
        self.pos += 1;
        let leaf = self.algebra.leaf(condition)?;
        Ok((leaf, (-condition.parentheses_delta()).max(0) as usize))
    }
}

fn opens_of(condition: &Condition) -> usize {
    condition.parentheses_delta().max(0) as usize
}

/// Backend-independent tree, mainly for diagnostics and evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionTree {
    Leaf(Condition),
    And(Vec<ConditionTree>),
    Or(Vec<ConditionTree>),
}

impl ConditionTree {
    pub fn build(conditions: &[Condition]) -> ConfigResult<Option<ConditionTree>> {
        TreeBuilder::build(conditions, &mut ConditionTreeAlgebra)
    }

    pub fn evaluate(&self, truth: &impl Fn(&Condition) -> bool) -> bool {
        match self {
            ConditionTree::Leaf(condition) => truth(condition),
            ConditionTree::And(children) => children.iter().all(|child| child.evaluate(truth)),
            ConditionTree::Or(children) => children.iter().any(|child| child.evaluate(truth)),
        }
    }

    pub fn leaves(&self) -> Vec<&Condition> {
        match self {
            ConditionTree::Leaf(condition) => vec![condition],
            ConditionTree::And(children) | ConditionTree::Or(children) => {
                children.iter().flat_map(ConditionTree::leaves).collect()
            }
        }
    }

    /// Nested infix form; compound children are parenthesized.
    pub fn render(&self, label: &impl Fn(&Condition) -> String) -> String {
        let (children, separator) = match self {
            ConditionTree::Leaf(condition) => return label(condition),
            ConditionTree::And(children) => (children, " AND "),
            ConditionTree::Or(children) => (children, " OR "),
        };
        children
            .iter()
            .map(|child| match child {
                ConditionTree::Leaf(_) => child.render(label),
                _ => format!("({})", child.render(label)),
            })
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl fmt::Display for ConditionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(&Condition::label))
    }
}

/// Builds [`ConditionTree`]s, flattening same-kind chains.
pub struct ConditionTreeAlgebra;

impl PredicateAlgebra for ConditionTreeAlgebra {
    type Output = ConditionTree;

    fn leaf(&mut self, condition: &Condition) -> ConfigResult<ConditionTree> {
        Ok(ConditionTree::Leaf(condition.clone()))
    }

    fn combine_by_and(&mut self, left: ConditionTree, right: ConditionTree) -> ConditionTree {
        let mut children = match left {
            ConditionTree::And(children) => children,
            other => vec![other],
        };
        match right {
            ConditionTree::And(more) => children.extend(more),
            other => children.push(other),
        }
        ConditionTree::And(children)
    }

    fn combine_by_or(&mut self, left: ConditionTree, right: ConditionTree) -> ConditionTree {
        let mut children = match left {
            ConditionTree::Or(children) => children,
            other => vec![other],
        };
        match right {
            ConditionTree::Or(more) => children.extend(more),
            other => children.push(other),
        }
        ConditionTree::Or(children)
    }
}

struct Frame {
    acc: Option<bool>,
    /// How this frame's value folds into its parent.
    combinator: Combinator,
}

fn fold(frame: &mut Frame, combinator: Combinator, value: bool) {
    frame.acc = Some(match (frame.acc, combinator) {
        (None, _) => value,
        (Some(acc), Combinator::And) => acc && value,
        (Some(acc), Combinator::Or) => acc || value,
    });
}

/// Evaluates the flat encoding directly with a stack of open groups, without
/// building a tree. An empty list is `true`.
pub fn evaluate_flat(
    conditions: &[Condition],
    truth: impl Fn(&Condition) -> bool,
) -> ConfigResult<bool> {
    let malformed = |reason: &str| ConfigError::MalformedEncoding {
        reason: reason.to_string(),
    };
    let mut stack = vec![Frame {
        acc: None,
        combinator: Combinator::And,
    }];
    for condition in conditions {
        let delta = condition.parentheses_delta();
        let mut combinator = condition.combinator();
        for _ in 0..delta.max(0) {
            stack.push(Frame {
                acc: None,
                combinator,
            });
            combinator = Combinator::And;
        }
        let top = stack.last_mut().ok_or_else(|| malformed("empty stack"))?;
        fold(top, combinator, truth(condition));
        for _ in 0..(-delta).max(0) {
            let closed = stack.pop().ok_or_else(|| malformed("empty stack"))?;
            let parent = stack
                .last_mut()
                .ok_or_else(|| malformed("group closed beyond the top level"))?;
            fold(parent, closed.combinator, closed.acc.unwrap_or(true));
        }
    }
    match stack.as_slice() {
        [top] => Ok(top.acc.unwrap_or(true)),
        _ => Err(malformed("group is never closed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{FieldDescriptor, FieldPath, Operand, OperatorKind};
    use crate::value::FieldType;

    fn cond(name: &str, combinator: Combinator, delta: i32) -> Condition {
        Condition::regular(
            "t",
            FieldPath::single(FieldDescriptor::new(name, FieldType::Bool)),
            OperatorKind::Equal,
            Operand::literal(true),
            combinator,
        )
        .with_delta(delta)
    }

    fn name(condition: &Condition) -> String {
        condition.field().dotted_name()
    }

    fn shape(conditions: &[Condition]) -> String {
        ConditionTree::build(conditions)
            .unwrap()
            .map(|tree| tree.render(&name))
            .unwrap_or_default()
    }

    #[test]
    fn test_left_fold_without_precedence() {
        // a OR b AND c with no parentheses is (a OR b) AND c
        let flat = vec![
            cond("a", Combinator::And, 0),
            cond("b", Combinator::Or, 0),
            cond("c", Combinator::And, 0),
        ];
        assert_eq!(shape(&flat), "(a OR b) AND c");
    }

    #[test]
    fn test_groups_and_flattening() {
        let flat = vec![
            cond("a", Combinator::And, 0),
            cond("b", Combinator::Or, 1),
            cond("c", Combinator::And, -1),
            cond("d", Combinator::Or, 0),
        ];
        assert_eq!(shape(&flat), "a OR (b AND c) OR d");

        let nested = vec![
            cond("a", Combinator::And, 2),
            cond("b", Combinator::Or, -1),
            cond("c", Combinator::And, -1),
        ];
        assert_eq!(shape(&nested), "(a OR b) AND c");
    }

    #[test]
    fn test_group_combinator_applies_to_group() {
        let flat = vec![
            cond("a", Combinator::And, 0),
            cond("b", Combinator::Or, 1),
            cond("c", Combinator::Or, -1),
        ];
        assert_eq!(shape(&flat), "a OR b OR c");
        let tree = ConditionTree::build(&flat).unwrap().unwrap();
        assert!(matches!(tree, ConditionTree::Or(ref children) if children.len() == 3));
    }

    #[test]
    fn test_malformed_lists_are_rejected() {
        let unclosed = vec![cond("a", Combinator::And, 1), cond("b", Combinator::And, 0)];
        assert!(ConditionTree::build(&unclosed).is_err());
        assert!(evaluate_flat(&unclosed, |_| true).is_err());

        let over_closed = vec![cond("a", Combinator::And, 0), cond("b", Combinator::And, -1)];
        assert!(ConditionTree::build(&over_closed).is_err());
        assert!(evaluate_flat(&over_closed, |_| true).is_err());
    }

    #[test]
    fn test_flat_and_tree_evaluation_agree() {
        let flat = vec![
            cond("a", Combinator::And, 1),
            cond("b", Combinator::Or, -1),
            cond("c", Combinator::And, 0),
            cond("d", Combinator::Or, 0),
        ];
        let tree = ConditionTree::build(&flat).unwrap().unwrap();
        for bits in 0..16u32 {
            let truth = |c: &Condition| {
                let index = ["a", "b", "c", "d"]
                    .iter()
                    .position(|n| *n == c.field().dotted_name())
                    .unwrap_or(0);
                bits & (1 << index) != 0
            };
            assert_eq!(evaluate_flat(&flat, truth).unwrap(), tree.evaluate(&truth));
        }
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(ConditionTree::build(&[]).unwrap(), None);
        assert!(evaluate_flat(&[], |_| false).unwrap());
    }
}
