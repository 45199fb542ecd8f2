//! 查询脚本的语法分析器
//!
//! ## 解析流程图
//!
//! ```text
//! parse()
//!   ├─ 检查token类型
//!   │   ├─ "FROM"  → parse_source()
//!   │   │              ├─ 解析容器名 (Identifier)
//!   │   │              └─ 可选 AS 别名
//!   │   │
//!   │   ├─ "[LEFT|CROSS] JOIN" → parse_join()
//!   │   │              ├─ 解析容器名与可选别名
//!   │   │              └─ 可选 ON field op field (AND field op field)*
//!   │   │
//!   │   └─ "WHERE" → parse_where_expression()
//!   │                  ├─ parse_term()
//!   │                  │    ├─ "(" → BeginGroup, 递归 parse_where_expression, ")" → EndGroup
//!   │                  │    └─ parse_filter()
//!   │                  │         ├─ 解析字段名 (a.b.c)
//!   │                  │         ├─ IS [NOT] NULL
//!   │                  │         ├─ [NOT] IN (值列表)
//!   │                  │         ├─ [NOT] LIKE / ILIKE 字符串
//!   │                  │         ├─ [NOT] BETWEEN 值 AND 值
//!   │                  │         ├─ BITS ALL|ANY 值
//!   │                  │         └─ 比较运算符 + 值 (字面量 / :参数 / 字段)
//!   │                  │
//!   │                  └─ 遇到 AND / OR 时记录组合符，继续 parse_term()
//!   │
//!   └─ 语句之间以 ';' 分隔
//! ```
//!
//! ## 优先级
//!
//! 解析器不构造表达式树，`WHERE` 子句按源码顺序输出
//! `Filter / And / Or / BeginGroup / EndGroup` 步骤。
//! `AND` 高于 `OR` 的优先级由构建器的自动加括号规则实现。
//!
//! ## 解析示例
//!
//! ```text
//! FROM Orders AS o;
//! JOIN Customers AS c ON c.Id = o.CustomerId;
//! CROSS JOIN Products AS p;
//! WHERE o.Status = "Open" OR (o.Total > 100 AND c.Vip = TRUE) AND o.Note IS NOT NULL
//! ```

use crate::ast::{
    FieldName, Filter, FilterOperand, Identifier, JoinClause, Literal, OnComparison, Script, Source, Step,
};
use crate::condition::{ContainerRole, OperatorKind};
use crate::error::{ConfigError, ConfigResult};
use crate::lexer::Lexer;
use crate::schema::SchemaRegistry;
use crate::shape::{OperationKind, QueryShape};
use crate::token::{Span, Token, TokenKind};
use std::fmt;

pub struct Parser<'a> {
    tokens: &'a [Token<'a>],
    position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Option<Span>,
}

impl ParseError {
    fn new(message: String, span: Option<Span>) -> Self {
        Self { message, span }
    }

    fn at_position(message: String, span: Span) -> Self {
        Self {
            message,
            span: Some(span),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "{} (位置 {}-{})", self.message, span.start, span.end),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for ConfigError {
    fn from(error: ParseError) -> Self {
        ConfigError::Script(error.to_string())
    }
}

/// 对脚本进行分词并解析为语法树
pub fn parse_script(input: &str) -> Result<Script, ParseError> {
    let tokens: Vec<_> = Lexer::new(input).collect();
    Parser::new(&tokens).parse()
}

/// 解析脚本并回放到指定类型的查询形状上
pub fn compile_script(input: &str, kind: OperationKind, schema: &SchemaRegistry) -> ConfigResult<QueryShape> {
    parse_script(input)?.build_shape(kind, schema)
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token<'a>]) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// 返回当前 token，不推进位置
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.position)
    }

    /// 返回当前 token 并推进位置
    fn advance(&mut self) -> Option<&Token<'a>> {
        let token = self.tokens.get(self.position);
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// 期望特定类型的 token 并推进，否则返回错误
    fn expect(&mut self, expected: TokenKind) -> Result<Token<'a>, ParseError> {
        match self.peek().cloned() {
            Some(token) if std::mem::discriminant(&token.kind) == std::mem::discriminant(&expected) => {
                self.position += 1;
                Ok(token)
            }
            Some(token) => Err(ParseError::at_position(
                format!("Expected {:?}, found {:?}", expected, token.kind),
                token.span,
            )),
            None => Err(ParseError::new(
                format!("Expected {:?}, but reached end of input", expected),
                None,
            )),
        }
    }

    fn expect_identifier(&mut self) -> Result<Identifier, ParseError> {
        let token = self.expect(TokenKind::Identifier(""))?;
        match token.kind {
            TokenKind::Identifier(name) => Ok(Identifier(name.to_string())),
            _ => Err(ParseError::at_position(
                "Expected identifier".to_string(),
                token.span,
            )),
        }
    }

    /// 检查当前 token 是否匹配给定类型
    fn match_token(&self, kind: &TokenKind) -> bool {
        if let Some(token) = self.peek() {
            std::mem::discriminant(&token.kind) == std::mem::discriminant(kind)
        } else {
            false
        }
    }

    /// 当前 token 匹配时消费它
    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.match_token(kind) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, what: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::at_position(
                format!("Expected {}, found {:?}", what, token.kind),
                token.span,
            ),
            None => ParseError::new(format!("Expected {}, but reached end of input", what), None),
        }
    }

    pub fn parse(&mut self) -> Result<Script, ParseError> {
        let mut script = Script::default();
        let mut seen_where = false;

        while let Some(token) = self.peek().cloned() {
            match token.kind {
                TokenKind::Semicolon => {
                    self.advance(); // 允许空语句
                    continue;
                }
                TokenKind::From => {
                    self.advance(); // 消费 FROM
                    if script.source.is_some() {
                        return Err(ParseError::at_position(
                            "FROM may appear only once".to_string(),
                            token.span,
                        ));
                    }
                    script.source = Some(self.parse_source()?);
                }
                TokenKind::Join | TokenKind::Left | TokenKind::Cross => {
                    let join = self.parse_join()?;
                    script.joins.push(join);
                }
                TokenKind::Where => {
                    self.advance(); // 消费 WHERE
                    if seen_where {
                        return Err(ParseError::at_position(
                            "WHERE may appear only once".to_string(),
                            token.span,
                        ));
                    }
                    seen_where = true;
                    self.parse_where_expression(&mut script.steps)?;
                }
                _ => {
                    return Err(ParseError::at_position(
                        format!("Unexpected token: {:?}", token.kind),
                        token.span,
                    ));
                }
            }

            // 语句之后只能是分号或输入结束
            if self.peek().is_some() && !self.match_token(&TokenKind::Semicolon) {
                return Err(self.unexpected("';'"));
            }
        }

        Ok(script)
    }

    fn parse_alias(&mut self) -> Result<Option<Identifier>, ParseError> {
        if self.eat(&TokenKind::As) {
            Ok(Some(self.expect_identifier()?))
        } else {
            Ok(None)
        }
    }

    fn parse_source(&mut self) -> Result<Source, ParseError> {
        let container = self.expect_identifier()?;
        let alias = self.parse_alias()?;
        Ok(Source { container, alias })
    }

    fn parse_join(&mut self) -> Result<JoinClause, ParseError> {
        let role = if self.eat(&TokenKind::Left) {
            ContainerRole::LeftJoin
        } else if self.eat(&TokenKind::Cross) {
            ContainerRole::CrossJoin
        } else {
            ContainerRole::Join
        };
        self.expect(TokenKind::Join)?;
        let container = self.expect_identifier()?;
        let alias = self.parse_alias()?;

        let mut on = Vec::new();
        if self.eat(&TokenKind::On) {
            loop {
                let left = self.parse_field_name()?;
                let operator = self.parse_comparison_operator()?;
                let right = self.parse_field_name()?;
                on.push(OnComparison {
                    left,
                    operator,
                    right,
                });
                if !self.eat(&TokenKind::And) {
                    break;
                }
            }
        }

        Ok(JoinClause {
            role,
            container,
            alias,
            on,
        })
    }

    /// 解析 `WHERE` 表达式
    ///
    /// 语法: `term ((AND | OR) term)*`
    fn parse_where_expression(&mut self, steps: &mut Vec<Step>) -> Result<(), ParseError> {
        self.parse_term(steps)?;
        loop {
            if self.eat(&TokenKind::And) {
                steps.push(Step::And);
            } else if self.eat(&TokenKind::Or) {
                steps.push(Step::Or);
            } else {
                return Ok(());
            }
            self.parse_term(steps)?;
        }
    }

    /// 语法: `'(' where_expression ')' | filter`
    fn parse_term(&mut self, steps: &mut Vec<Step>) -> Result<(), ParseError> {
        if self.eat(&TokenKind::LParen) {
            steps.push(Step::BeginGroup);
            self.parse_where_expression(steps)?;
            self.expect(TokenKind::RParen)?;
            steps.push(Step::EndGroup);
        } else {
            steps.push(Step::Filter(self.parse_filter()?));
        }
        Ok(())
    }

    fn parse_field_name(&mut self) -> Result<FieldName, ParseError> {
        let mut segments = vec![self.expect_identifier()?.0];
        while self.eat(&TokenKind::Dot) {
            segments.push(self.expect_identifier()?.0);
        }
        Ok(FieldName { segments })
    }

    /// 解析单个过滤谓词
    fn parse_filter(&mut self) -> Result<Filter, ParseError> {
        let field = self.parse_field_name()?;
        let filter = |operator, operand| Filter {
            field: field.clone(),
            operator,
            operand,
            case_insensitive: false,
        };

        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("operator"));
        };
        match token.kind {
            TokenKind::Is => {
                self.advance(); // 消费 IS
                let operator = if self.eat(&TokenKind::Not) {
                    OperatorKind::IsNotNull
                } else {
                    OperatorKind::IsNull
                };
                self.expect(TokenKind::Null)?;
                Ok(filter(operator, FilterOperand::None))
            }
            TokenKind::Bits => {
                self.advance(); // 消费 BITS
                let operator = if self.eat(&TokenKind::All) {
                    OperatorKind::BitsAnd
                } else if self.eat(&TokenKind::Any) {
                    OperatorKind::BitsOr
                } else {
                    return Err(self.unexpected("ALL or ANY"));
                };
                Ok(filter(operator, self.parse_value()?))
            }
            TokenKind::Not => {
                self.advance(); // 消费 NOT
                self.parse_negatable(field.clone(), true)
            }
            TokenKind::In | TokenKind::Like | TokenKind::Ilike | TokenKind::Between => {
                self.parse_negatable(field.clone(), false)
            }
            _ => {
                let operator = self.parse_comparison_operator()?;
                Ok(filter(operator, self.parse_value()?))
            }
        }
    }

    /// 可以被 `NOT` 修饰的谓词: IN / LIKE / ILIKE / BETWEEN
    fn parse_negatable(&mut self, field: FieldName, negated: bool) -> Result<Filter, ParseError> {
        let pick = |plain, not| if negated { not } else { plain };
        let mut case_insensitive = false;

        let (operator, operand) = if self.eat(&TokenKind::In) {
            (pick(OperatorKind::In, OperatorKind::NotIn), self.parse_list()?)
        } else if self.eat(&TokenKind::Like) {
            (pick(OperatorKind::Like, OperatorKind::NotLike), self.parse_pattern()?)
        } else if self.eat(&TokenKind::Ilike) {
            case_insensitive = true;
            (pick(OperatorKind::Like, OperatorKind::NotLike), self.parse_pattern()?)
        } else if self.eat(&TokenKind::Between) {
            let low = self.parse_literal()?;
            self.expect(TokenKind::And)?;
            let high = self.parse_literal()?;
            (
                pick(OperatorKind::Between, OperatorKind::NotBetween),
                FilterOperand::Range(low, high),
            )
        } else {
            return Err(self.unexpected("IN, LIKE, ILIKE or BETWEEN"));
        };

        Ok(Filter {
            field,
            operator,
            operand,
            case_insensitive,
        })
    }

    /// 列表: `(值, 值, ...)`、`:参数` 或字段
    fn parse_list(&mut self) -> Result<FilterOperand, ParseError> {
        if !self.eat(&TokenKind::LParen) {
            return match self.parse_value()? {
                FilterOperand::Literal(_) => Err(self.unexpected("'('")),
                operand => Ok(operand),
            };
        }
        let mut values = Vec::new();

        // 解析逗号分隔的值列表
        if !self.match_token(&TokenKind::RParen) {
            loop {
                values.push(self.parse_literal()?);
                if self.match_token(&TokenKind::RParen) {
                    break;
                }
                self.expect(TokenKind::Comma)?;
            }
        }

        self.expect(TokenKind::RParen)?;
        Ok(FilterOperand::List(values))
    }

    fn parse_pattern(&mut self) -> Result<FilterOperand, ParseError> {
        if self.eat(&TokenKind::Colon) {
            return Ok(FilterOperand::Parameter(self.expect_identifier()?));
        }
        let token = self.expect(TokenKind::String(""))?;
        match token.kind {
            TokenKind::String(s) => Ok(FilterOperand::Literal(Literal::String(s.to_string()))),
            _ => Err(ParseError::at_position(
                "Expected pattern string".to_string(),
                token.span,
            )),
        }
    }

    /// 比较右侧的值: `:参数`、字段名或字面量
    fn parse_value(&mut self) -> Result<FilterOperand, ParseError> {
        if self.eat(&TokenKind::Colon) {
            return Ok(FilterOperand::Parameter(self.expect_identifier()?));
        }
        if self.match_token(&TokenKind::Identifier("")) {
            return Ok(FilterOperand::Field(self.parse_field_name()?));
        }
        Ok(FilterOperand::Literal(self.parse_literal()?))
    }

    fn parse_comparison_operator(&mut self) -> Result<OperatorKind, ParseError> {
        if let Some(token) = self.advance() {
            match &token.kind {
                TokenKind::Eq => Ok(OperatorKind::Equal),
                TokenKind::NotEq => Ok(OperatorKind::NotEqual),
                TokenKind::Gt => Ok(OperatorKind::Greater),
                TokenKind::Lt => Ok(OperatorKind::Less),
                TokenKind::Gte => Ok(OperatorKind::GreaterOrEqual),
                TokenKind::Lte => Ok(OperatorKind::LessOrEqual),
                _ => Err(ParseError::at_position(
                    format!("Expected comparison operator, found {:?}", token.kind),
                    token.span,
                )),
            }
        } else {
            Err(ParseError::new("Expected comparison operator".to_string(), None))
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        // 负数: '-' 紧跟数字
        let negative = self.eat(&TokenKind::Dash);
        if let Some(token) = self.advance() {
            match (&token.kind, negative) {
                (TokenKind::Number(n), false) => Ok(Literal::Number(*n)),
                (TokenKind::Number(n), true) => Ok(Literal::Number(-*n)),
                (TokenKind::Float(f), false) => Ok(Literal::Float(*f)),
                (TokenKind::Float(f), true) => Ok(Literal::Float(-*f)),
                (TokenKind::String(s), false) => Ok(Literal::String(s.to_string())),
                (TokenKind::True, false) => Ok(Literal::Bool(true)),
                (TokenKind::False, false) => Ok(Literal::Bool(false)),
                (TokenKind::Null, false) => Ok(Literal::Null),
                _ => Err(ParseError::at_position(
                    format!("Expected literal value, found {:?}", token.kind),
                    token.span,
                )),
            }
        } else {
            Err(ParseError::new("Expected literal value".to_string(), None))
        }
    }
}
