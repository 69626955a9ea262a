//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! Single left-to-right scan without backtracking. Keywords are matched only
//! when not followed by an identifier character, and multi-character
//! punctuators are matched before single-character ones so `<=` never lexes
//! as `<` `=`.

use crate::error::{CompileError, CompileResult};

const KEYWORDS: [&str; 6] = ["return", "if", "else", "for", "while", "int"];

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  /// Keywords and punctuators.
  Reserved,
  Ident,
  Num,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub value: Option<i64>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, loc: usize, len: usize, value: Option<i64>) -> Self {
    Self {
      kind,
      value,
      loc,
      len,
    }
  }
}

fn is_ident_start(c: u8) -> bool {
  c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
  c.is_ascii_alphanumeric() || c == b'_'
}

/// Length of the keyword at the start of `rest`, if any.
fn keyword_len(rest: &[u8]) -> Option<usize> {
  KEYWORDS
    .iter()
    .find(|kw| {
      rest.starts_with(kw.as_bytes()) && !rest.get(kw.len()).copied().is_some_and(is_ident_continue)
    })
    .map(|kw| kw.len())
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if let Some(len) = keyword_len(&bytes[i..]) {
      tokens.push(Token::new(TokenKind::Reserved, i, len, None));
      i += len;
      continue;
    }

    if is_ident_start(c) {
      let start = i;
      while i < bytes.len() && is_ident_continue(bytes[i]) {
        i += 1;
      }
      tokens.push(Token::new(TokenKind::Ident, start, i - start, None));
      continue;
    }

    if let Some(op) = ["==", "!=", "<=", ">="]
      .into_iter()
      .find(|op| input[i..].starts_with(op))
    {
      tokens.push(Token::new(TokenKind::Reserved, i, op.len(), None));
      i += op.len();
      continue;
    }

    if matches!(
      c,
      b'+'
        | b'-'
        | b'*'
        | b'/'
        | b'&'
        | b'('
        | b')'
        | b'{'
        | b'}'
        | b'['
        | b']'
        | b'<'
        | b'>'
        | b'='
        | b','
        | b';'
    ) {
      tokens.push(Token::new(TokenKind::Reserved, i, 1, None));
      i += 1;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      // Wraps on overflow instead of rejecting oversized literals.
      let mut value: i64 = 0;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        value = value.wrapping_mul(10).wrapping_add(i64::from(bytes[i] - b'0'));
        i += 1;
      }
      tokens.push(Token::new(TokenKind::Num, start, i - start, Some(value)));
      continue;
    }

    let invalid_char = input[i..].chars().next().unwrap_or('\0');
    return Err(CompileError::lex(
      input,
      i,
      format!("invalid token: '{invalid_char}'"),
    ));
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0, None));
  Ok(tokens)
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = token.loc + token.len;
  &source[token.loc..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}

/// Render the token stream one token per line, for `--dump-tokens`.
pub fn dump_tokens(tokens: &[Token], source: &str) -> String {
  let mut out: String = tokens
    .iter()
    .map(|token| {
      let value = token.value.map(|v| format!("\t{v}")).unwrap_or_default();
      format!("{:?}\t{}{value}\n", token.kind, describe_token(Some(token), source))
    })
    .collect();
  out.push_str("end.\n");
  out
}
