//! The token definition for the query-shape script.

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Statement keywords
    From,  // "FROM"
    Join,  // "JOIN"
    Left,  // "LEFT"
    Cross, // "CROSS"
    As,    // "AS"
    On,    // "ON"
    Where, // "WHERE"

    // Predicate keywords
    And,     // "AND"
    Or,      // "OR"
    Not,     // "NOT"
    In,      // "IN"
    Is,      // "IS"
    Null,    // "NULL"
    Like,    // "LIKE"
    Ilike,   // "ILIKE"
    Between, // "BETWEEN"
    Bits,    // "BITS"
    All,     // "ALL"
    Any,     // "ANY"
    True,    // "TRUE"
    False,   // "FALSE"

    // Literals
    Identifier(&'a str),
    String(&'a str), // Content between the quotes
    Number(i64),
    Float(f64),

    // Punctuation
    LParen,    // (
    RParen,    // )
    Comma,     // ,
    Dot,       // .
    Colon,     // :
    Semicolon, // ;
    Dash,      // -

    // Operators
    Eq,    // =
    NotEq, // !=
    Gt,    // >
    Lt,    // <
    Gte,   // >=
    Lte,   // <=

    // Special
    Illegal, // An illegal/unknown character
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
