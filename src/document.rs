//! Document-store backend: renders condition trees as filter documents in the
//! `$and` / `$or` / `$in` / `$regex` vocabulary.
//!
//! A conjunction of predicates on distinct keys is one flat map. When a key
//! would be asserted twice the operands go into an explicit `$and` array
//! instead, so no constraint is overwritten.

use crate::condition::{Condition, OperatorKind};
use crate::error::ConfigResult;
use crate::render::{BitsMode, ColumnRef, CompareOp, ConditionRenderer, ParameterValues, Predicate};
use crate::schema::FieldResolver;
use crate::shape::PreparedQuery;
use crate::tree::{PredicateAlgebra, TreeBuilder};
use crate::value::Value;
use serde_json::{json, Map, Value as Json};
use tracing::trace;

pub type Document = Map<String, Json>;

/// Filters of one pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFilter {
    /// Alias of the container the stage introduces; the root alias for stage 0.
    pub alias: String,
    /// Join predicate of the stage, `None` for the root and cross joins.
    pub connect: Option<Document>,
    /// Filter applied after the stage, `None` when no slice lands here.
    pub filter: Option<Document>,
}

struct DocumentAlgebra<'a> {
    renderer: ConditionRenderer<'a>,
    root_alias: &'a str,
}

impl DocumentAlgebra<'_> {
    /// Root fields are addressed by storage name, joined ones under their alias.
    fn key(&self, column: &ColumnRef) -> String {
        if column.alias == self.root_alias {
            column.storage.0.clone()
        } else {
            format!("{}.{}", column.alias, column.storage.0)
        }
    }

    fn predicate_to_document(&self, predicate: Predicate) -> Document {
        let key = self.key(predicate.column());
        match predicate {
            Predicate::Compare {
                op,
                value,
                case_insensitive: true,
                ..
            } => {
                let pattern = json!({ "$regex": format!("^{}$", escape_regex(&text_of(&value))), "$options": "i" });
                match op {
                    CompareOp::Ne => single(key, json!({ "$not": pattern })),
                    _ => single(key, pattern),
                }
            }
            Predicate::Compare { op, value, .. } => {
                let value = to_json(&value);
                match op {
                    CompareOp::Eq => single(key, value),
                    CompareOp::Ne => single(key, json!({ "$ne": value })),
                    CompareOp::Gt => single(key, json!({ "$gt": value })),
                    CompareOp::Ge => single(key, json!({ "$gte": value })),
                    CompareOp::Lt => single(key, json!({ "$lt": value })),
                    CompareOp::Le => single(key, json!({ "$lte": value })),
                }
            }
            Predicate::Null { negated, .. } => {
                if negated {
                    single(key, json!({ "$ne": null }))
                } else {
                    single(key, Json::Null)
                }
            }
            Predicate::Membership {
                values,
                negated,
                case_insensitive: true,
                ..
            } => {
                let alternatives: Vec<Json> = values
                    .iter()
                    .map(|value| {
                        json!({ key.as_str(): { "$regex": format!("^{}$", escape_regex(&text_of(value))), "$options": "i" } })
                    })
                    .collect();
                single(if negated { "$nor" } else { "$or" }.to_string(), Json::Array(alternatives))
            }
            Predicate::Membership { values, negated, .. } => {
                let values: Vec<Json> = values.iter().map(to_json).collect();
                let op = if negated { "$nin" } else { "$in" };
                single(key, json!({ op: values }))
            }
            Predicate::Pattern {
                pattern,
                negated,
                case_insensitive,
                ..
            } => {
                let mut regex = Map::new();
                regex.insert("$regex".to_string(), Json::String(like_to_regex(&pattern)));
                if case_insensitive {
                    regex.insert("$options".to_string(), Json::String("i".to_string()));
                }
                if negated {
                    single(key, json!({ "$not": regex }))
                } else {
                    single(key, Json::Object(regex))
                }
            }
            Predicate::Bits { mask, mode, .. } => match mode {
                BitsMode::All => single(key, json!({ "$bitsAllSet": mask })),
                BitsMode::Any => single(key, json!({ "$bitsAnySet": mask })),
            },
            Predicate::Range {
                low, high, negated, ..
            } => {
                let (low, high) = (to_json(&low), to_json(&high));
                if negated {
                    single(
                        "$or".to_string(),
                        json!([{ key.as_str(): { "$lt": low } }, { key.as_str(): { "$gt": high } }]),
                    )
                } else {
                    single(key, json!({ "$gte": low, "$lte": high }))
                }
            }
            Predicate::FieldCompare { operator, other, .. } => {
                let left = format!("${key}");
                let right = format!("${}", self.key(&other));
                let expr = match operator {
                    OperatorKind::NotEqual => json!({ "$ne": [left, right] }),
                    OperatorKind::Greater => json!({ "$gt": [left, right] }),
                    OperatorKind::GreaterOrEqual => json!({ "$gte": [left, right] }),
                    OperatorKind::Less => json!({ "$lt": [left, right] }),
                    OperatorKind::LessOrEqual => json!({ "$lte": [left, right] }),
                    OperatorKind::In => json!({ "$in": [left, right] }),
                    OperatorKind::NotIn => json!({ "$not": [{ "$in": [left, right] }] }),
                    OperatorKind::BitsAnd => {
                        json!({ "$eq": [{ "$bitAnd": [left, right.clone()] }, right] })
                    }
                    OperatorKind::BitsOr => json!({ "$ne": [{ "$bitAnd": [left, right] }, 0] }),
                    // renderer only admits the field-comparison subset
                    _ => json!({ "$eq": [left, right] }),
                };
                single("$expr".to_string(), expr)
            }
        }
    }
}

impl PredicateAlgebra for DocumentAlgebra<'_> {
    type Output = Document;

    fn leaf(&mut self, condition: &Condition) -> ConfigResult<Document> {
        let predicate = self.renderer.render(condition)?;
        Ok(self.predicate_to_document(predicate))
    }

    fn combine_by_and(&mut self, left: Document, right: Document) -> Document {
        conjoin(left, right)
    }

    fn combine_by_or(&mut self, left: Document, right: Document) -> Document {
        let mut alternatives = operands_of(left, "$or");
        alternatives.extend(operands_of(right, "$or"));
        single("$or".to_string(), Json::Array(alternatives))
    }
}

fn single(key: String, value: Json) -> Document {
    let mut document = Map::new();
    document.insert(key, value);
    document
}

/// Operands of a document that is exactly `{ op: [...] }`, else the document itself.
fn operands_of(document: Document, op: &str) -> Vec<Json> {
    if document.len() == 1 {
        if let Some(Json::Array(items)) = document.get(op) {
            return items.clone();
        }
    }
    vec![Json::Object(document)]
}

fn conjoin(mut left: Document, right: Document) -> Document {
    if right.keys().all(|key| !left.contains_key(key)) {
        left.extend(right);
        return left;
    }
    trace!("repeated key in conjunction, using $and");
    let mut operands = operands_of(left, "$and");
    operands.extend(operands_of(right, "$and"));
    single("$and".to_string(), Json::Array(operands))
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int8(v) => json!(v),
        Value::Int16(v) => json!(v),
        Value::Int32(v) => json!(v),
        Value::Int64(v) => json!(v),
        Value::Float32(v) => json!(v),
        Value::Float64(v) => json!(v),
        Value::Text(s) => json!(s),
        Value::Enum { value, .. } => json!(value),
        Value::List(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Range(low, high) => json!([to_json(low), to_json(high)]),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `%` matches any run, `_` one character; the match is anchored at both ends.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&escape_regex(&c.to_string())),
        }
    }
    out.push('$');
    out
}

/// Renders prepared shapes as filter documents.
pub struct DocumentCompiler<'a> {
    resolver: &'a dyn FieldResolver,
}

impl<'a> DocumentCompiler<'a> {
    pub fn new(resolver: &'a dyn FieldResolver) -> Self {
        Self { resolver }
    }

    /// Filter document of a condition list or slice; `None` when empty.
    pub fn render_predicate(
        &self,
        prepared: &PreparedQuery,
        conditions: &[Condition],
        values: &ParameterValues,
    ) -> ConfigResult<Option<Document>> {
        let renderer = ConditionRenderer::new(prepared.plan.order().containers(), self.resolver, values);
        let mut algebra = DocumentAlgebra {
            renderer,
            root_alias: &prepared.root().alias,
        };
        TreeBuilder::build(conditions, &mut algebra)
    }

    /// Connect tree and filter of every stage, in stage order.
    pub fn render_stage_filters(
        &self,
        prepared: &PreparedQuery,
        values: &ParameterValues,
    ) -> ConfigResult<Vec<StageFilter>> {
        let mut stages = Vec::with_capacity(prepared.plan.stages().len());
        for (index, stage) in prepared.plan.stages().iter().enumerate() {
            let alias = match &stage.container {
                Some(container) => container.alias.clone(),
                None => prepared.root().alias.clone(),
            };
            let connect = self.render_predicate(prepared, &stage.connect, values)?;
            let mut filter: Option<Document> = None;
            for slice in &stage.slices {
                if let Some(document) = self.render_predicate(prepared, slice.conditions(), values)? {
                    filter = Some(match filter {
                        Some(previous) => conjoin(previous, document),
                        None => document,
                    });
                }
            }
            trace!(stage = index, alias = %alias, "stage filter rendered");
            stages.push(StageFilter {
                alias,
                connect,
                filter,
            });
        }
        Ok(stages)
    }
}
