//! # Condition Engine
//!
//! Builds boolean filter expressions through a fluent, left-to-right API,
//! stores them as a flat list with parentheses deltas, and turns that list
//! into backend predicates: sea-query SQL statements or filter documents.
//!
//! ## Pipeline
//!
//! ```text
//! ConditionEngine (add / and / or / begin_group / end_group)
//!   └─ normalize()            → NormalizedConditionList
//!        ├─ ContainerGraph    → ContainerOrder
//!        ├─ ConditionSlicer   → ConditionSlice*
//!        └─ StagePlanner      → StagePlan
//!             └─ TreeBuilder + PredicateAlgebra → SQL / document filters
//! ```
//!
//! ## Module Organization
//!
//! - [`builder`] - fluent condition builder and auto-parenthesization
//! - [`normalize`] - validation and the frozen condition list
//! - [`tree`] - recursive descent over the flat encoding
//! - [`render`] - leaf predicates, type and nullability checks
//! - [`graph`] - container ordering
//! - [`plan`] - slicing and stage placement
//! - [`shape`] - operation kinds, prepared shapes and their caches
//! - [`sql_compiler`] / [`document`] - backends
//! - [`lexer`] / [`parser`] / [`ast`] - query-shape scripts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use condition_engine::{compile_script, OperationKind, ParameterValues, SchemaRegistry, SqlCompiler};
//!
//! # fn example() -> Result<(), condition_engine::ConfigError> {
//! let schema = SchemaRegistry::default();
//! let mut shape = compile_script(
//!     r#"FROM Orders AS o; WHERE o.Status = "Open" OR o.Total > 100 AND o.Note IS NOT NULL"#,
//!     OperationKind::Select,
//!     &schema,
//! )?;
//! let prepared = shape.prepare()?;
//! let sql = SqlCompiler::new(schema).compile(&prepared, &ParameterValues::new())?;
//! println!("{sql}");
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod builder;
pub mod condition;
pub mod document;
pub mod error;
pub mod graph;
pub mod lexer;
pub mod logging;
pub mod normalize;
pub mod parser;
pub mod plan;
pub mod render;
pub mod schema;
pub mod shape;
pub mod sql_compiler;
pub mod token;
pub mod tree;
pub mod value;

pub use builder::ConditionEngine;
pub use condition::{
    Combinator, Condition, Container, ContainerKind, ContainerRole, FieldDescriptor, FieldPath, FieldRef,
    Operand, OperatorKind, Parameter,
};
pub use document::{DocumentCompiler, StageFilter};
pub use error::{ConfigError, ConfigResult};
pub use graph::{ContainerGraph, ContainerOrder};
pub use normalize::NormalizedConditionList;
pub use parser::{compile_script, parse_script, ParseError};
pub use plan::{ConditionSlice, ConditionSlicer, Stage, StagePlan, StagePlanner};
pub use render::{ConditionRenderer, ParameterValues, Predicate};
pub use schema::{FieldResolver, IdentityResolver, SchemaRegistry, StorageName};
pub use shape::{FrozenSlot, OperationKind, PreparedQuery, QueryShape, ShapeCache};
pub use sql_compiler::{CompilerConfig, SqlCompiler, SqlDialect};
pub use tree::{evaluate_flat, ConditionTree, PredicateAlgebra, TreeBuilder};
pub use value::{FieldType, IntWidth, Value};
