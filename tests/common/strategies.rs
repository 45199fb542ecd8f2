use condition_engine::{
    Combinator, Condition, ConditionEngine, ConfigResult, Container, ContainerRole, FieldDescriptor, FieldPath,
    FieldType, Operand, OperatorKind,
};
use proptest::prelude::*;

/// One operand of a builder call script: a leaf or a parenthesized sequence.
#[derive(Debug, Clone)]
pub enum CallExpr {
    Leaf,
    Group(CallSeq),
}

/// `first (combinator operand)*`, replayed left to right against the builder.
#[derive(Debug, Clone)]
pub struct CallSeq {
    pub first: Box<CallExpr>,
    pub rest: Vec<(Combinator, CallExpr)>,
}

/// Leaf `k` (in call order) is an `IS NULL` test on field `F{k}`.
pub fn leaf_field(k: usize) -> FieldPath {
    FieldPath::single(FieldDescriptor::new(format!("F{k}"), FieldType::Int32).nullable())
}

pub fn leaf_index(condition: &Condition) -> usize {
    condition.field().leaf().name[1..]
        .parse()
        .expect("leaf fields are named F<k>")
}

/// Containers `T0..Tn`; leaf `k` reads `T{k % n}`, or the only container
/// without naming it.
pub fn leaf_alias(k: usize, containers: usize) -> Option<String> {
    (containers > 1).then(|| format!("T{}", k % containers))
}

impl CallExpr {
    fn apply(&self, engine: &mut ConditionEngine, containers: usize, next: &mut usize) -> ConfigResult<()> {
        match self {
            CallExpr::Leaf => {
                let alias = leaf_alias(*next, containers);
                engine.add_regular_condition(
                    alias.as_deref(),
                    leaf_field(*next),
                    OperatorKind::IsNull,
                    Operand::None,
                )?;
                *next += 1;
            }
            CallExpr::Group(seq) => {
                engine.begin_group()?;
                seq.apply(engine, containers, next)?;
                engine.end_group()?;
            }
        }
        Ok(())
    }

    fn evaluate(&self, truth: &dyn Fn(usize) -> bool, next: &mut usize) -> bool {
        match self {
            CallExpr::Leaf => {
                let value = truth(*next);
                *next += 1;
                value
            }
            CallExpr::Group(seq) => seq.evaluate(truth, next),
        }
    }

    fn leaf_count(&self) -> usize {
        match self {
            CallExpr::Leaf => 1,
            CallExpr::Group(seq) => seq.leaf_count(),
        }
    }
}

impl CallSeq {
    pub fn apply(&self, engine: &mut ConditionEngine, containers: usize, next: &mut usize) -> ConfigResult<()> {
        self.first.apply(engine, containers, next)?;
        for (combinator, operand) in &self.rest {
            match combinator {
                Combinator::And => engine.and()?,
                Combinator::Or => engine.or()?,
            };
            operand.apply(engine, containers, next)?;
        }
        Ok(())
    }

    /// Reference semantics: AND binds tighter than OR, groups are parentheses.
    pub fn evaluate(&self, truth: &dyn Fn(usize) -> bool, next: &mut usize) -> bool {
        let mut result = false;
        let mut run = self.first.evaluate(truth, next);
        for (combinator, operand) in &self.rest {
            // every operand is evaluated so leaf numbering stays aligned
            let value = operand.evaluate(truth, next);
            match combinator {
                Combinator::And => run = run && value,
                Combinator::Or => {
                    result = result || run;
                    run = value;
                }
            }
        }
        result || run
    }

    /// Fresh engine over `containers` cross-joined containers with this
    /// script replayed on it.
    pub fn build(&self, containers: usize) -> ConfigResult<ConditionEngine> {
        let mut engine = ConditionEngine::new();
        engine.add_container(Container::root("T0"))?;
        for index in 1..containers {
            engine.add_container(Container::cross_join(format!("T{index}")))?;
        }
        self.apply(&mut engine, containers, &mut 0)?;
        Ok(engine)
    }

    pub fn leaf_count(&self) -> usize {
        self.first.leaf_count() + self.rest.iter().map(|(_, operand)| operand.leaf_count()).sum::<usize>()
    }
}

pub fn combinator_strategy() -> impl Strategy<Value = Combinator> {
    prop_oneof![Just(Combinator::And), Just(Combinator::Or)]
}

fn seq_from(inner: impl Strategy<Value = CallExpr> + Clone) -> impl Strategy<Value = CallSeq> {
    (
        inner.clone(),
        prop::collection::vec((combinator_strategy(), inner), 0..4),
    )
        .prop_map(|(first, rest)| CallSeq {
            first: Box::new(first),
            rest,
        })
}

/// Operands nested at most four levels deep.
pub fn call_expr_strategy() -> impl Strategy<Value = CallExpr> {
    Just(CallExpr::Leaf).prop_recursive(4, 16, 4, |inner| seq_from(inner).prop_map(CallExpr::Group))
}

/// Whole WHERE-style call scripts.
pub fn call_seq_strategy() -> impl Strategy<Value = CallSeq> {
    (
        call_expr_strategy(),
        prop::collection::vec((combinator_strategy(), call_expr_strategy()), 0..6),
    )
        .prop_map(|(first, rest)| CallSeq {
            first: Box::new(first),
            rest,
        })
}

/// Multi-container layout: container `i > 0` either cross-joins or connects
/// to an earlier one.
#[derive(Debug, Clone)]
pub struct JoinLayout {
    pub parents: Vec<(ContainerRole, Option<usize>)>,
    pub insertion_order: Vec<usize>,
}

impl JoinLayout {
    pub fn alias(index: usize) -> String {
        format!("C{index}")
    }

    pub fn container(&self, index: usize) -> Container {
        let role = if index == 0 {
            ContainerRole::Root
        } else {
            self.parents[index - 1].0
        };
        let alias = Self::alias(index);
        match role {
            ContainerRole::Root => Container::root(alias),
            ContainerRole::Join => Container::join(alias),
            ContainerRole::LeftJoin => Container::left_join(alias),
            ContainerRole::CrossJoin => Container::cross_join(alias),
        }
    }
}

pub fn join_layout_strategy() -> impl Strategy<Value = JoinLayout> {
    (1usize..7).prop_flat_map(|count| {
        let parents: Vec<_> = (1..count)
            .map(|index| {
                prop_oneof![
                    Just((ContainerRole::CrossJoin, None)),
                    (0..index).prop_map(|parent| (ContainerRole::Join, Some(parent))),
                    (0..index).prop_map(|parent| (ContainerRole::LeftJoin, Some(parent))),
                ]
            })
            .collect();
        let order: Vec<usize> = (0..count).collect();
        (parents, Just(order).prop_shuffle()).prop_map(|(parents, insertion_order)| JoinLayout {
            parents,
            insertion_order,
        })
    })
}
