use crate::tree::NodeId;
use std::ops::Range;
use thiserror::Error;

pub type ParseResult<T> = Result<T, ParseError>;

pub type TreeResult<T> = Result<T, TreeError>;

/// Errors produced while reading markup text into a tree
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unexpected token at {pos}: expected {expected}, found {found}")]
    UnexpectedToken {
        pos: usize,
        expected: String,
        found: String,
    },

    #[error("Unexpected end of file at {pos}")]
    UnexpectedEof { pos: usize },

    #[error("Invalid syntax at {pos}: {message}")]
    InvalidSyntax { pos: usize, message: String },

    #[error("Lexer error at {pos}")]
    LexerError { pos: usize },
}

impl ParseError {
    pub fn unexpected_token(pos: usize, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::UnexpectedToken {
            pos,
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn unexpected_eof(pos: usize) -> Self {
        Self::UnexpectedEof { pos }
    }

    pub fn invalid_syntax(pos: usize, message: impl Into<String>) -> Self {
        Self::InvalidSyntax {
            pos,
            message: message.into(),
        }
    }

    pub fn lexer_error(pos: usize) -> Self {
        Self::LexerError { pos }
    }

    pub fn pos(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { pos, .. }
            | ParseError::UnexpectedEof { pos }
            | ParseError::InvalidSyntax { pos, .. }
            | ParseError::LexerError { pos } => *pos,
        }
    }

    fn label(&self) -> String {
        match self {
            ParseError::UnexpectedToken { expected, .. } => format!("expected {}", expected),
            ParseError::UnexpectedEof { .. } => "input ends here".to_string(),
            ParseError::InvalidSyntax { message, .. } => message.clone(),
            ParseError::LexerError { .. } => "unrecognized input".to_string(),
        }
    }

    fn range(&self, source: &str) -> Range<usize> {
        let start = self.pos().min(source.len().saturating_sub(1));
        start..(start + 1).min(source.len()).max(start)
    }
}

/// Errors raised by the tree when an edit is refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("File '{path}' is read-only")]
    ReadOnly { path: String },

    #[error("Node {0:?} is not valid")]
    InvalidNode(NodeId),

    #[error("Node {0:?} is not a tag")]
    NotATag(NodeId),

    #[error("File already has a root tag")]
    RootExists,

    #[error("Tree of '{path}' is not loaded")]
    TreeNotLoaded { path: String },

    #[error("Invalid name: '{0}'")]
    InvalidName(String),
}

/// Pretty-print a parse error with source context using ariadne
#[cfg(feature = "pretty-errors")]
pub fn format_error(source: &str, filename: &str, error: &ParseError) -> String {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let mut output = Vec::new();
    let range = error.range(source);

    let report = Report::build(ReportKind::Error, filename, range.start)
        .with_message(error.to_string())
        .with_label(
            Label::new((filename, range))
                .with_color(Color::Red)
                .with_message(error.label()),
        )
        .finish();

    if report
        .write((filename, Source::from(source)), &mut output)
        .is_err()
    {
        return error.to_string();
    }

    String::from_utf8(output).unwrap_or_else(|_| error.to_string())
}

/// Plain rendering used when ariadne is not compiled in
#[cfg(not(feature = "pretty-errors"))]
pub fn format_error(source: &str, filename: &str, error: &ParseError) -> String {
    let range = error.range(source);
    format!("{}:{}: {} ({})", filename, range.start, error, error.label())
}
