//! SQL compiler that turns prepared query shapes into SQL statements using sea-query.

use crate::condition::{Condition, ContainerRole, FieldPath, OperatorKind};
use crate::error::{ConfigError, ConfigResult};
use crate::render::{BitsMode, ColumnRef, CompareOp, ConditionRenderer, ParameterValues, Predicate};
use crate::schema::{FieldResolver, SchemaRegistry};
use crate::shape::{OperationKind, PreparedQuery};
use crate::tree::{PredicateAlgebra, TreeBuilder};
use crate::value::Value;
use sea_query::{
    Asterisk, Condition as SqlCondition, Expr, ExprTrait, Func, Iden, JoinType,
    MysqlQueryBuilder, PostgresQueryBuilder, Query, QueryStatementWriter, SimpleExpr,
    SqliteQueryBuilder, Value as SqlValue,
};
use tracing::debug;

/// Target SQL dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    #[default]
    Postgres,
    MySql,
    Sqlite,
}

/// Configuration for SQL generation
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub dialect: SqlDialect,
    /// Prefix columns with the container alias in SELECT statements
    pub qualify_columns: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::Postgres,
            qualify_columns: true,
        }
    }
}

/// Table, alias or column identifier for sea-query
#[derive(Debug, Clone)]
pub struct Ident(pub String);

impl Iden for Ident {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = s.write_str(&self.0);
    }
}

/// Boolean structure built while folding a condition list; same-kind
/// neighbours are flattened into one `ALL`/`ANY` group.
#[derive(Debug, Clone)]
pub enum SqlNode {
    Expr(SimpleExpr),
    All(Vec<SqlNode>),
    Any(Vec<SqlNode>),
}

impl SqlNode {
    pub fn into_condition(self) -> SqlCondition {
        match self {
            SqlNode::Expr(expr) => SqlCondition::all().add(expr),
            SqlNode::All(children) => children
                .into_iter()
                .fold(SqlCondition::all(), |acc, child| child.add_to(acc)),
            SqlNode::Any(children) => children
                .into_iter()
                .fold(SqlCondition::any(), |acc, child| child.add_to(acc)),
        }
    }

    fn add_to(self, condition: SqlCondition) -> SqlCondition {
        match self {
            SqlNode::Expr(expr) => condition.add(expr),
            nested => condition.add(nested.into_condition()),
        }
    }
}

/// Tree-builder target producing sea-query expressions
struct SqlAlgebra<'a> {
    renderer: ConditionRenderer<'a>,
    qualify: bool,
}

impl SqlAlgebra<'_> {
    fn column(&self, column: &ColumnRef) -> Expr {
        if self.qualify {
            Expr::col((Ident(column.alias.clone()), Ident(column.storage.0.clone())))
        } else {
            Expr::col(Ident(column.storage.0.clone()))
        }
    }

    /// Column expression, lower-cased for case-insensitive predicates
    fn subject(&self, column: &ColumnRef, case_insensitive: bool) -> Expr {
        if case_insensitive {
            Expr::expr(Func::lower(self.column(column)))
        } else {
            self.column(column)
        }
    }

    fn predicate_to_expr(&self, predicate: Predicate) -> ConfigResult<SimpleExpr> {
        let expr = match predicate {
            Predicate::Compare {
                column,
                op,
                value,
                case_insensitive,
            } => {
                let col = self.subject(&column, case_insensitive);
                let val = to_sql_value(fold_case(value, case_insensitive))?;
                match op {
                    CompareOp::Eq => col.eq(val),
                    CompareOp::Ne => col.ne(val),
                    CompareOp::Gt => col.gt(val),
                    CompareOp::Ge => col.gte(val),
                    CompareOp::Lt => col.lt(val),
                    CompareOp::Le => col.lte(val),
                }
            }
            Predicate::Null { column, negated } => {
                if negated {
                    self.column(&column).is_not_null()
                } else {
                    self.column(&column).is_null()
                }
            }
            Predicate::Membership {
                column,
                values,
                negated,
                case_insensitive,
            } => {
                let col = self.subject(&column, case_insensitive);
                let in_values: Vec<SqlValue> = values
                    .into_iter()
                    .map(|v| to_sql_value(fold_case(v, case_insensitive)))
                    .collect::<ConfigResult<Vec<_>>>()?;
                if negated {
                    col.is_not_in(in_values)
                } else {
                    col.is_in(in_values)
                }
            }
            Predicate::Pattern {
                column,
                pattern,
                negated,
                case_insensitive,
            } => {
                let col = self.subject(&column, case_insensitive);
                let pattern = if case_insensitive {
                    pattern.to_lowercase()
                } else {
                    pattern
                };
                if negated {
                    col.not_like(pattern)
                } else {
                    col.like(pattern)
                }
            }
            Predicate::Bits { column, mask, mode } => {
                let masked = Expr::expr(self.column(&column).bit_and(mask));
                match mode {
                    BitsMode::All => masked.eq(mask),
                    BitsMode::Any => masked.ne(0),
                }
            }
            Predicate::Range {
                column,
                low,
                high,
                negated,
            } => {
                let col = self.column(&column);
                let (low, high) = (to_sql_value(low)?, to_sql_value(high)?);
                if negated {
                    col.not_between(low, high)
                } else {
                    col.between(low, high)
                }
            }
            Predicate::FieldCompare {
                column,
                operator,
                other,
            } => {
                let col = self.column(&column);
                let other = self.column(&other);
                match operator {
                    OperatorKind::Equal => col.eq(other),
                    OperatorKind::NotEqual => col.ne(other),
                    OperatorKind::Greater => col.gt(other),
                    OperatorKind::GreaterOrEqual => col.gte(other),
                    OperatorKind::Less => col.lt(other),
                    OperatorKind::LessOrEqual => col.lte(other),
                    OperatorKind::In => col.is_in([other]),
                    OperatorKind::NotIn => col.is_not_in([other]),
                    OperatorKind::BitsAnd => Expr::expr(col.bit_and(other.clone())).eq(other),
                    OperatorKind::BitsOr => Expr::expr(col.bit_and(other)).ne(0),
                    operator => {
                        return Err(ConfigError::InvalidFieldComparison {
                            operator: operator.to_string(),
                        })
                    }
                }
            }
        };
        Ok(expr)
    }
}

impl PredicateAlgebra for SqlAlgebra<'_> {
    type Output = SqlNode;

    fn leaf(&mut self, condition: &Condition) -> ConfigResult<SqlNode> {
        let predicate = self.renderer.render(condition)?;
        Ok(SqlNode::Expr(self.predicate_to_expr(predicate)?))
    }

    fn combine_by_and(&mut self, left: SqlNode, right: SqlNode) -> SqlNode {
        let mut children = match left {
            SqlNode::All(children) => children,
            other => vec![other],
        };
        match right {
            SqlNode::All(more) => children.extend(more),
            other => children.push(other),
        }
        SqlNode::All(children)
    }

    fn combine_by_or(&mut self, left: SqlNode, right: SqlNode) -> SqlNode {
        let mut children = match left {
            SqlNode::Any(children) => children,
            other => vec![other],
        };
        match right {
            SqlNode::Any(more) => children.extend(more),
            other => children.push(other),
        }
        SqlNode::Any(children)
    }
}

fn fold_case(value: Value, case_insensitive: bool) -> Value {
    match value {
        Value::Text(text) if case_insensitive => Value::Text(text.to_lowercase()),
        other => other,
    }
}

/// Convert a scalar engine value to a sea-query value
fn to_sql_value(value: Value) -> ConfigResult<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::String(None)),
        Value::Bool(v) => Ok(SqlValue::Bool(Some(v))),
        Value::Int8(v) => Ok(SqlValue::TinyInt(Some(v))),
        Value::Int16(v) => Ok(SqlValue::SmallInt(Some(v))),
        Value::Int32(v) => Ok(SqlValue::Int(Some(v))),
        Value::Int64(v) => Ok(SqlValue::BigInt(Some(v))),
        Value::Float32(v) => Ok(SqlValue::Float(Some(v))),
        Value::Float64(v) => Ok(SqlValue::Double(Some(v))),
        Value::Text(v) => Ok(SqlValue::String(Some(Box::new(v)))),
        Value::Enum { value, .. } => Ok(SqlValue::BigInt(Some(value))),
        other @ (Value::List(_) | Value::Range(_, _)) => Err(ConfigError::MalformedEncoding {
            reason: format!("{} is not a scalar SQL value", other.kind_name()),
        }),
    }
}

/// SQL Compiler that renders prepared query shapes as SQL statements
pub struct SqlCompiler {
    config: CompilerConfig,
    /// Maps containers and fields to table and column names
    schema: SchemaRegistry,
}

impl SqlCompiler {
    pub fn new(schema: SchemaRegistry) -> Self {
        Self {
            config: CompilerConfig::default(),
            schema,
        }
    }

    pub fn with_config(schema: SchemaRegistry, config: CompilerConfig) -> Self {
        Self { config, schema }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    fn to_sql<S: QueryStatementWriter>(&self, statement: &S) -> String {
        match self.config.dialect {
            SqlDialect::Postgres => statement.to_string(PostgresQueryBuilder),
            SqlDialect::MySql => statement.to_string(MysqlQueryBuilder),
            SqlDialect::Sqlite => statement.to_string(SqliteQueryBuilder),
        }
    }

    fn table(&self, underlying_name: &str) -> Ident {
        Ident(self.schema.storage_container(underlying_name))
    }

    /// Render a condition list (or one slice of it) as a sea-query condition.
    /// An empty list renders as `None`.
    pub fn render_predicate(
        &self,
        prepared: &PreparedQuery,
        conditions: &[Condition],
        values: &ParameterValues,
        qualify: bool,
    ) -> ConfigResult<Option<SqlCondition>> {
        let renderer = ConditionRenderer::new(prepared.plan.order().containers(), &self.schema, values);
        let mut algebra = SqlAlgebra { renderer, qualify };
        Ok(TreeBuilder::build(conditions, &mut algebra)?.map(SqlNode::into_condition))
    }

    /// All filter slices of the plan AND-ed together
    fn where_condition(
        &self,
        prepared: &PreparedQuery,
        values: &ParameterValues,
        qualify: bool,
    ) -> ConfigResult<SqlCondition> {
        let mut filters = SqlCondition::all();
        for slice in prepared.plan.slices() {
            if let Some(condition) = self.render_predicate(prepared, slice.conditions(), values, qualify)? {
                filters = filters.add(condition);
            }
        }
        Ok(filters)
    }

    fn expect_kind(prepared: &PreparedQuery, kind: OperationKind, statement: &str) -> ConfigResult<()> {
        if prepared.kind == kind {
            Ok(())
        } else {
            Err(ConfigError::UnsupportedOperation {
                kind: prepared.kind.to_string(),
                operation: statement.to_string(),
            })
        }
    }

    /// Compile the statement matching the shape's operation kind
    pub fn compile(&self, prepared: &PreparedQuery, values: &ParameterValues) -> ConfigResult<String> {
        match prepared.kind {
            OperationKind::Select => self.compile_select(prepared, values),
            OperationKind::Delete => self.compile_delete(prepared, values),
            OperationKind::SoftDelete => self.compile_soft_delete(prepared, values),
            OperationKind::Restore => self.compile_restore(prepared, values),
            OperationKind::Update => Err(ConfigError::UnsupportedOperation {
                kind: prepared.kind.to_string(),
                operation: "compile without assignments".to_string(),
            }),
        }
    }

    /// Compile a select shape: one JOIN per stage, connect conditions as ON,
    /// every filter slice in WHERE
    pub fn compile_select(&self, prepared: &PreparedQuery, values: &ParameterValues) -> ConfigResult<String> {
        Self::expect_kind(prepared, OperationKind::Select, "SELECT")?;
        let qualify = self.config.qualify_columns;
        let root = prepared.root();

        let mut select = Query::select();
        select.column(Asterisk);
        select.from_as(self.table(&root.underlying_name), Ident(root.alias.clone()));

        for stage in prepared.plan.stages() {
            let Some(container) = &stage.container else {
                continue;
            };
            let on = match container.role {
                ContainerRole::CrossJoin => SqlCondition::all().add(SimpleExpr::from(Expr::val(true))),
                _ => self
                    .render_predicate(prepared, &stage.connect, values, true)?
                    .ok_or_else(|| ConfigError::JoinWithoutConnect {
                        alias: container.alias.clone(),
                    })?,
            };
            let join_type = match container.role {
                ContainerRole::LeftJoin => JoinType::LeftJoin,
                _ => JoinType::InnerJoin,
            };
            select.join_as(
                join_type,
                self.table(&container.underlying_name),
                Ident(container.alias.clone()),
                on,
            );
        }

        select.cond_where(self.where_condition(prepared, values, qualify)?);
        let sql = self.to_sql(&select);
        debug!(sql = %sql, "select compiled");
        Ok(sql)
    }

    pub fn compile_delete(&self, prepared: &PreparedQuery, values: &ParameterValues) -> ConfigResult<String> {
        Self::expect_kind(prepared, OperationKind::Delete, "DELETE")?;
        let mut delete = Query::delete();
        delete
            .from_table(self.table(&prepared.root().underlying_name))
            .cond_where(self.where_condition(prepared, values, false)?);
        Ok(self.to_sql(&delete))
    }

    pub fn compile_update(
        &self,
        prepared: &PreparedQuery,
        values: &ParameterValues,
        assignments: &[(FieldPath, Value)],
    ) -> ConfigResult<String> {
        Self::expect_kind(prepared, OperationKind::Update, "UPDATE")?;
        self.update_statement(prepared, values, assignments)
    }

    pub fn compile_soft_delete(&self, prepared: &PreparedQuery, values: &ParameterValues) -> ConfigResult<String> {
        Self::expect_kind(prepared, OperationKind::SoftDelete, "soft delete")?;
        let flag = self.soft_delete_flag(prepared)?;
        self.update_statement(prepared, values, &[(flag, Value::Bool(true))])
    }

    pub fn compile_restore(&self, prepared: &PreparedQuery, values: &ParameterValues) -> ConfigResult<String> {
        Self::expect_kind(prepared, OperationKind::Restore, "restore")?;
        let flag = self.soft_delete_flag(prepared)?;
        self.update_statement(prepared, values, &[(flag, Value::Bool(false))])
    }

    fn soft_delete_flag(&self, prepared: &PreparedQuery) -> ConfigResult<FieldPath> {
        let root = &prepared.root().underlying_name;
        self.schema.soft_delete_field(root)?.ok_or_else(|| {
            ConfigError::Schema(format!("container '{root}' has no soft delete field"))
        })
    }

    fn update_statement(
        &self,
        prepared: &PreparedQuery,
        values: &ParameterValues,
        assignments: &[(FieldPath, Value)],
    ) -> ConfigResult<String> {
        let root = prepared.root();
        let mut columns = Vec::with_capacity(assignments.len());
        for (path, value) in assignments {
            let accepted = if value.is_null() {
                path.is_nullable()
            } else {
                path.field_type().accepts(value)
            };
            if !accepted {
                return Err(ConfigError::TypeMismatch {
                    field: format!("{}.{}", root.alias, path),
                    expected: path.field_type().to_string(),
                    found: value.kind_name(),
                });
            }
            let storage = self.schema.resolve(root, path)?;
            columns.push((Ident(storage.0), SimpleExpr::from(to_sql_value(value.clone())?)));
        }

        let mut update = Query::update();
        update
            .table(self.table(&root.underlying_name))
            .values(columns)
            .cond_where(self.where_condition(prepared, values, false)?);
        Ok(self.to_sql(&update))
    }
}
