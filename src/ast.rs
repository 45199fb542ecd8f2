//! 查询脚本的语法树，以及把语法树回放为构建器调用的逻辑
//!
//! 语法树只记录源码顺序：`WHERE` 子句被保存为扁平的步骤序列，
//! 运算符优先级完全交给构建器的自动加括号规则处理。

use crate::condition::{
    Container, ContainerRole, FieldPath, Operand, OperatorKind, Parameter,
};
use crate::error::{ConfigError, ConfigResult};
use crate::schema::SchemaRegistry;
use crate::shape::{OperationKind, QueryShape};
use crate::value::{FieldType, IntWidth, Value};
use std::collections::HashMap;
use tracing::debug;

/// AST 的根节点, 代表一个完整的脚本
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    /// `FROM` 子句声明的根容器
    pub source: Option<Source>,
    pub joins: Vec<JoinClause>,
    /// `WHERE` 子句按源码顺序展开的步骤
    pub steps: Vec<Step>,
}

/// `FROM Orders AS o`
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub container: Identifier,
    pub alias: Option<Identifier>,
}

/// `LEFT JOIN Customers AS c ON c.Id = o.CustomerId`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub role: ContainerRole,
    pub container: Identifier,
    pub alias: Option<Identifier>,
    pub on: Vec<OnComparison>,
}

/// `ON` 子句中的一个字段比较
#[derive(Debug, Clone, PartialEq)]
pub struct OnComparison {
    pub left: FieldName,
    pub operator: OperatorKind,
    pub right: FieldName,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(pub String);

/// 点分字段名，例如 `o.ShipTo.City`
///
/// 第一段是否为别名在回放时才能确定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldName {
    pub segments: Vec<String>,
}

impl FieldName {
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

/// `WHERE` 子句中的一个步骤
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Filter(Filter),
    And,
    Or,
    BeginGroup,
    EndGroup,
}

/// 单个过滤谓词, 例如 `o.Total > 100`
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: FieldName,
    pub operator: OperatorKind,
    pub operand: FilterOperand,
    /// 由 `ILIKE` 产生
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOperand {
    None,
    Literal(Literal),
    List(Vec<Literal>),
    Range(Literal, Literal),
    Parameter(Identifier),
    Field(FieldName),
}

/// 字面量值
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(i64),
    Float(f64),
    String(String),
}

impl Literal {
    /// 按字段声明的类型转换字面量；无法转换时保留原始类型，由渲染阶段报告类型不匹配
    fn to_value(&self, field_type: &FieldType) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::String(s) => Value::Text(s.clone()),
            Literal::Float(f) => match field_type {
                FieldType::Float32 => Value::Float32(*f as f32),
                _ => Value::Float64(*f),
            },
            Literal::Number(n) => integer_value(*n, field_type),
        }
    }
}

fn integer_value(n: i64, field_type: &FieldType) -> Value {
    if let FieldType::Enum { name, .. } = field_type {
        return Value::Enum {
            type_name: name.clone(),
            value: n,
        };
    }
    let narrowed = match field_type.int_width() {
        Some(IntWidth::Int8) => i8::try_from(n).ok().map(Value::Int8),
        Some(IntWidth::Int16) => i16::try_from(n).ok().map(Value::Int16),
        Some(IntWidth::Int32) => i32::try_from(n).ok().map(Value::Int32),
        _ => None,
    };
    match (narrowed, field_type) {
        (Some(value), _) => value,
        (None, FieldType::Float64) => Value::Float64(n as f64),
        (None, FieldType::Float32) => Value::Float32(n as f32),
        (None, _) => Value::Int64(n),
    }
}

/// 比较运算符交换左右两侧后的等价运算符
fn mirrored(operator: OperatorKind) -> OperatorKind {
    match operator {
        OperatorKind::Greater => OperatorKind::Less,
        OperatorKind::GreaterOrEqual => OperatorKind::LessOrEqual,
        OperatorKind::Less => OperatorKind::Greater,
        OperatorKind::LessOrEqual => OperatorKind::GreaterOrEqual,
        other => other,
    }
}

/// 别名 → 容器名
struct Scope {
    containers: HashMap<String, String>,
}

impl Scope {
    /// 解析字段名：第一段是已声明的别名时取其后的路径，否则字段属于唯一的容器
    fn resolve(&self, schema: &SchemaRegistry, field: &FieldName) -> ConfigResult<(String, FieldPath)> {
        if field.segments.len() > 1 {
            if let Some(container) = self.containers.get(&field.segments[0]) {
                let path = field.segments[1..].join(".");
                return Ok((field.segments[0].clone(), schema.field_path(container, &path)?));
            }
        }
        let mut declared = self.containers.iter();
        match (declared.next(), declared.next()) {
            (Some((alias, container)), None) => {
                Ok((alias.clone(), schema.field_path(container, &field.dotted())?))
            }
            (None, _) => Err(ConfigError::NoContainer),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousContainer {
                count: self.containers.len(),
            }),
        }
    }
}

impl Script {
    /// 把脚本回放到一个新的查询形状上
    pub fn build_shape(&self, kind: OperationKind, schema: &SchemaRegistry) -> ConfigResult<QueryShape> {
        let mut shape = QueryShape::new(kind);
        let mut scope = Scope {
            containers: HashMap::new(),
        };

        let source = self
            .source
            .as_ref()
            .ok_or_else(|| ConfigError::Script("script has no FROM clause".to_string()))?;
        let root = declare(schema, &mut scope, &source.container, source.alias.as_ref(), ContainerRole::Root)?;
        shape.add_container(root)?;

        for join in &self.joins {
            let container = declare(schema, &mut scope, &join.container, join.alias.as_ref(), join.role)?;
            let joined = container.alias.clone();
            shape.add_container(container)?;
            for comparison in &join.on {
                let (left_alias, left_path) = scope.resolve(schema, &comparison.left)?;
                let (right_alias, right_path) = scope.resolve(schema, &comparison.right)?;
                // 连接条件挂在被连接的容器上
                if right_alias == joined && left_alias != joined {
                    shape.add_connect_condition(
                        &right_alias,
                        right_path,
                        &left_alias,
                        left_path,
                        mirrored(comparison.operator),
                    )?;
                } else {
                    shape.add_connect_condition(
                        &left_alias,
                        left_path,
                        &right_alias,
                        right_path,
                        comparison.operator,
                    )?;
                }
            }
        }

        for step in &self.steps {
            match step {
                Step::And => shape.and()?,
                Step::Or => shape.or()?,
                Step::BeginGroup => shape.begin_group()?,
                Step::EndGroup => shape.end_group()?,
                Step::Filter(filter) => apply_filter(&mut shape, schema, &scope, filter)?,
            };
        }

        debug!(
            kind = %kind,
            containers = scope.containers.len(),
            steps = self.steps.len(),
            "script replayed"
        );
        Ok(shape)
    }
}

fn declare(
    schema: &SchemaRegistry,
    scope: &mut Scope,
    container: &Identifier,
    alias: Option<&Identifier>,
    role: ContainerRole,
) -> ConfigResult<Container> {
    let mut declared = schema.container(&container.0, role)?;
    if let Some(alias) = alias {
        declared = declared.alias(alias.0.clone());
    }
    scope
        .containers
        .insert(declared.alias.clone(), declared.underlying_name.clone());
    Ok(declared)
}

fn apply_filter<'s>(
    shape: &'s mut QueryShape,
    schema: &SchemaRegistry,
    scope: &Scope,
    filter: &Filter,
) -> ConfigResult<&'s mut QueryShape> {
    let (alias, path) = scope.resolve(schema, &filter.field)?;
    let field_type = path.field_type().clone();
    let operand = match &filter.operand {
        FilterOperand::None => Operand::None,
        FilterOperand::Literal(literal) => Operand::Literal(literal.to_value(&field_type)),
        FilterOperand::List(items) => {
            Operand::Literal(Value::List(items.iter().map(|item| item.to_value(&field_type)).collect()))
        }
        FilterOperand::Range(low, high) => Operand::Literal(Value::Range(
            Box::new(low.to_value(&field_type)),
            Box::new(high.to_value(&field_type)),
        )),
        FilterOperand::Parameter(name) => {
            let parameter = Parameter::input(name.0.clone(), field_type.clone());
            Operand::Parameter(if path.is_nullable() {
                parameter.nullable()
            } else {
                parameter
            })
        }
        FilterOperand::Field(other) => {
            let (other_alias, other_path) = scope.resolve(schema, other)?;
            Operand::field(other_alias, other_path)
        }
    };
    if filter.case_insensitive {
        shape.add_regular_condition_ignore_case(Some(&alias), path, filter.operator, operand)
    } else {
        shape.add_regular_condition(Some(&alias), path, filter.operator, operand)
    }
}
