//! Shared error utilities used across the compilation pipeline.
//!
//! Every failure is fatal: the first error ends compilation. Diagnostics for
//! user mistakes print the offending source line and point at the byte with a
//! caret; internal errors only carry a message.

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
pub enum CompileError {
  /// Unrecognised character in the source.
  #[snafu(display("{line}\n{marker} {message}"))]
  Lex {
    line: String,
    marker: String,
    message: String,
  },

  /// Expected token, identifier or number not found.
  #[snafu(display("{line}\n{marker} {message}"))]
  Syntax {
    line: String,
    marker: String,
    message: String,
  },

  /// Well-formed input that has no meaning (bad dereference, undeclared
  /// variable, non-lvalue, ...).
  #[snafu(display("{line}\n{marker} {message}"))]
  Semantic {
    line: String,
    marker: String,
    message: String,
  },

  /// A bug in the compiler itself, not in the input.
  #[snafu(display("internal error: {message}"))]
  Internal { message: String },
}

/// Slice out the line containing `loc` and build a caret marker under it.
fn locate(source: &str, loc: usize) -> (String, String) {
  let loc = loc.min(source.len());
  let start = source[..loc].rfind('\n').map_or(0, |i| i + 1);
  let end = source[loc..].find('\n').map_or(source.len(), |i| loc + i);
  let column = source[start..loc].chars().count();
  let marker = format!("{}^", " ".repeat(column));
  (source[start..end].to_string(), marker)
}

impl CompileError {
  /// Lexical error anchored at a byte offset in the source.
  pub fn lex(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let (line, marker) = locate(source, loc);
    Self::Lex {
      line,
      marker,
      message: message.into(),
    }
  }

  /// Syntax error anchored at the token that was actually found.
  pub fn syntax(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let (line, marker) = locate(source, loc);
    Self::Syntax {
      line,
      marker,
      message: message.into(),
    }
  }

  pub fn semantic(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let (line, marker) = locate(source, loc);
    Self::Semantic {
      line,
      marker,
      message: message.into(),
    }
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::Internal {
      message: message.into(),
    }
  }

  /// The bare message without the source excerpt.
  pub fn message(&self) -> &str {
    match self {
      Self::Lex { message, .. }
      | Self::Syntax { message, .. }
      | Self::Semantic { message, .. }
      | Self::Internal { message } => message,
    }
  }
}
