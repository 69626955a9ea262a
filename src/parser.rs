//! Recursive-descent parser producing functions, statements and expressions.
//!
//! The grammar, from lowest to highest precedence:
//!
//! ```text
//! program       = function*
//! function      = "int" "*"* ident "(" (param ("," param)*)? ")" "{" compound_stmt
//! param         = "int" declarator
//! compound_stmt = (declaration | stmt)* "}"
//! declaration   = "int" (declarator ("=" expr)? ("," declarator ("=" expr)?)*)? ";"
//! declarator    = "*"* ident ("[" num "]")?
//! stmt          = "return" expr ";"
//!               | "if" "(" expr ")" stmt ("else" stmt)?
//!               | "for" "(" expr? ";" expr? ";" expr? ")" stmt
//!               | "while" "(" expr ")" stmt
//!               | "{" compound_stmt
//!               | expr? ";"
//! expr          = assign
//! assign        = equality ("=" assign)?
//! equality      = relational ("==" relational | "!=" relational)*
//! relational    = add ("<" add | "<=" add | ">" add | ">=" add)*
//! add           = mul ("+" mul | "-" mul)*
//! mul           = unary ("*" unary | "/" unary)*
//! unary         = ("+" | "-" | "&" | "*") unary | postfix
//! postfix       = primary ("[" expr "]")*
//! primary       = "(" expr ")" | ident ("(" (assign ("," assign)*)? ")")? | num
//! ```
//!
//! Locals are function-scoped and collected in one flat list per function;
//! their frame offsets are assigned once the body is fully parsed.

use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind, describe_token, token_text};
use crate::ty::{Type, add_type, pointer_to};

/// Bytes at the top of every frame holding the saved scratch registers.
pub const FRAME_SAVE_AREA: i64 = 48;

/// Parameters and call arguments are passed in registers only.
pub const MAX_ARGS: usize = 6;

/// Pointer arithmetic always advances in 8-byte elements.
const ELEMENT_SIZE: i64 = 8;

/// Bound on nested statements and unary/parenthesised expressions, so deep
/// input fails with a diagnostic instead of exhausting the stack.
const MAX_NESTING: usize = 64;

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

impl BinaryOp {
  pub fn is_comparison(self) -> bool {
    matches!(
      self,
      Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
    )
  }
}

/// A local variable (parameters included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obj {
  pub name: String,
  pub ty: Type,
  /// Distance below the frame pointer, filled in after the body is parsed.
  pub offset: i64,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
  Binary {
    op: BinaryOp,
    lhs: Box<Node>,
    rhs: Box<Node>,
  },
  Assign {
    lhs: Box<Node>,
    rhs: Box<Node>,
  },
  Addr {
    operand: Box<Node>,
  },
  Deref {
    operand: Box<Node>,
  },
  Return {
    expr: Box<Node>,
  },
  If {
    cond: Box<Node>,
    then: Box<Node>,
    els: Option<Box<Node>>,
  },
  /// Also used for `while`, with only `cond` set.
  For {
    init: Option<Box<Node>>,
    cond: Option<Box<Node>>,
    inc: Option<Box<Node>>,
    then: Box<Node>,
  },
  Block {
    body: Vec<Node>,
  },
  Call {
    name: String,
    args: Vec<Node>,
  },
  ExprStmt {
    expr: Box<Node>,
  },
  /// Index into the owning function's `locals`.
  Var {
    obj: usize,
  },
  Num {
    value: i64,
  },
}

/// AST node. `ty` is filled in by [`add_type`] for expressions only.
#[derive(Debug, Clone)]
pub struct Node {
  pub kind: NodeKind,
  pub ty: Option<Type>,
  /// Source offset of the representative token, for diagnostics.
  pub loc: usize,
}

impl Node {
  fn new(kind: NodeKind, loc: usize) -> Self {
    Self {
      kind,
      ty: None,
      loc,
    }
  }

  pub fn number(value: i64, loc: usize) -> Self {
    Self::new(NodeKind::Num { value }, loc)
  }

  pub fn var(obj: usize, loc: usize) -> Self {
    Self::new(NodeKind::Var { obj }, loc)
  }

  pub fn binary(op: BinaryOp, lhs: Node, rhs: Node, loc: usize) -> Self {
    Self::new(
      NodeKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      },
      loc,
    )
  }

  pub fn assign(lhs: Node, rhs: Node, loc: usize) -> Self {
    Self::new(
      NodeKind::Assign {
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      },
      loc,
    )
  }

  pub fn addr(operand: Node, loc: usize) -> Self {
    Self::new(
      NodeKind::Addr {
        operand: Box::new(operand),
      },
      loc,
    )
  }

  pub fn deref(operand: Node, loc: usize) -> Self {
    Self::new(
      NodeKind::Deref {
        operand: Box::new(operand),
      },
      loc,
    )
  }

  pub fn expr_stmt(expr: Node, loc: usize) -> Self {
    Self::new(
      NodeKind::ExprStmt {
        expr: Box::new(expr),
      },
      loc,
    )
  }

  pub fn block(body: Vec<Node>, loc: usize) -> Self {
    Self::new(NodeKind::Block { body }, loc)
  }
}

/// A function definition with its frame layout resolved.
#[derive(Debug, Clone)]
pub struct Function {
  pub name: String,
  pub ty: Type,
  /// Indices into `locals`, in declaration order.
  pub params: Vec<usize>,
  pub body: Vec<Node>,
  pub locals: Vec<Obj>,
  /// Frame size in bytes, a multiple of 16.
  pub stack_size: i64,
}

/// Round `n` up to the nearest multiple of `align`.
pub fn align_to(n: i64, align: i64) -> i64 {
  (n + align - 1) / align * align
}

/// Assign frame offsets in declaration order and return the frame size.
fn assign_lvar_offsets(locals: &mut [Obj]) -> i64 {
  let mut offset = FRAME_SAVE_AREA;
  for var in locals.iter_mut() {
    offset += var.ty.size;
    var.offset = offset;
  }
  align_to(offset, 16)
}

/// Parse a whole translation unit.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Vec<Function>> {
  let mut parser = Parser {
    stream: TokenStream::new(tokens, source),
    locals: Vec::new(),
    depth: 0,
  };

  let mut program = Vec::new();
  while !parser.stream.is_eof() {
    program.push(parser.function()?);
  }
  Ok(program)
}

struct Parser<'a> {
  stream: TokenStream<'a>,
  /// Locals of the function currently being parsed.
  locals: Vec<Obj>,
  /// Current recursion depth through `stmt` and `unary`.
  depth: usize,
}

impl Parser<'_> {
  fn source(&self) -> &str {
    self.stream.source
  }

  fn find_var(&self, name: &str) -> Option<usize> {
    self.locals.iter().position(|var| var.name == name)
  }

  /// Register a local. Re-using a name yields the existing variable.
  fn new_lvar(&mut self, name: String, ty: Type) -> usize {
    if let Some(idx) = self.find_var(&name) {
      return idx;
    }
    self.locals.push(Obj {
      name,
      ty,
      offset: 0,
    });
    self.locals.len() - 1
  }

  fn add_type(&self, node: &mut Node) -> CompileResult<()> {
    add_type(node, &self.locals, self.stream.source)
  }

  fn function(&mut self) -> CompileResult<Function> {
    self.locals.clear();

    let mut ret = self.declspec()?;
    while self.stream.equal("*") {
      ret = pointer_to(ret);
    }
    let (name, _) = self.stream.get_ident()?;

    self.stream.skip("(")?;
    let mut params = Vec::new();
    if !self.stream.equal(")") {
      loop {
        let param_loc = self.stream.loc();
        let base = self.declspec()?;
        let (mut ty, param_name, _) = self.declarator(base)?;
        if ty.is_array()
          && let Some(elem) = ty.base().cloned()
        {
          ty = pointer_to(elem);
        }
        if params.len() == MAX_ARGS {
          return Err(CompileError::semantic(
            self.source(),
            param_loc,
            format!("too many parameters (at most {MAX_ARGS})"),
          ));
        }
        params.push(self.new_lvar(param_name, ty));
        if self.stream.equal(")") {
          break;
        }
        self.stream.skip(",")?;
      }
    }

    self.stream.skip("{")?;
    let body = self.compound_stmt()?;

    let mut locals = std::mem::take(&mut self.locals);
    let stack_size = assign_lvar_offsets(&mut locals);
    Ok(Function {
      name,
      ty: Type::func(ret),
      params,
      body,
      locals,
      stack_size,
    })
  }

  fn declspec(&mut self) -> CompileResult<Type> {
    self.stream.skip("int")?;
    Ok(Type::int())
  }

  /// Returns the declared type, the declared name and its location.
  fn declarator(&mut self, mut ty: Type) -> CompileResult<(Type, String, usize)> {
    while self.stream.equal("*") {
      ty = pointer_to(ty);
    }
    let (name, loc) = self.stream.get_ident()?;

    if self.stream.equal("[") {
      let (len, len_loc) = self.stream.get_number()?;
      if len <= 0 {
        return Err(CompileError::semantic(
          self.source(),
          len_loc,
          "array length must be positive",
        ));
      }
      self.stream.skip("]")?;
      ty = Type::array_of(ty, len);
    }
    Ok((ty, name, loc))
  }

  /// Parse block contents up to and including the closing brace.
  fn compound_stmt(&mut self) -> CompileResult<Vec<Node>> {
    let mut body = Vec::new();
    while !self.stream.equal("}") {
      if self.stream.is_eof() {
        return Err(CompileError::syntax(
          self.source(),
          self.stream.loc(),
          "expected \"}\", but got \"EOF\"",
        ));
      }
      let mut stmt = if self.stream.is("int") {
        self.declaration()?
      } else {
        self.stmt()?
      };
      self.add_type(&mut stmt)?;
      body.push(stmt);
    }
    Ok(body)
  }

  /// Declarations lower to a block of assignments for their initialisers.
  fn declaration(&mut self) -> CompileResult<Node> {
    let loc = self.stream.loc();
    let base = self.declspec()?;

    let mut body = Vec::new();
    let mut first = true;
    while !self.stream.equal(";") {
      if !first {
        self.stream.skip(",")?;
      }
      first = false;

      let (ty, name, var_loc) = self.declarator(base.clone())?;
      let obj = self.new_lvar(name, ty);

      let assign_loc = self.stream.loc();
      if !self.stream.equal("=") {
        continue;
      }
      let lhs = Node::var(obj, var_loc);
      let rhs = self.assign()?;
      body.push(Node::expr_stmt(Node::assign(lhs, rhs, assign_loc), assign_loc));
    }
    Ok(Node::block(body, loc))
  }

  /// Run `f` one nesting level deeper, rejecting input past `MAX_NESTING`.
  fn nested<T>(
    &mut self,
    what: &str,
    f: impl FnOnce(&mut Self) -> CompileResult<T>,
  ) -> CompileResult<T> {
    if self.depth >= MAX_NESTING {
      return Err(CompileError::syntax(
        self.source(),
        self.stream.loc(),
        format!("{what} nested too deeply"),
      ));
    }
    self.depth += 1;
    let result = f(self);
    self.depth -= 1;
    result
  }

  fn stmt(&mut self) -> CompileResult<Node> {
    self.nested("statement", Self::statement)
  }

  fn statement(&mut self) -> CompileResult<Node> {
    let loc = self.stream.loc();

    if self.stream.equal("return") {
      let expr = self.expr()?;
      self.stream.skip(";")?;
      return Ok(Node::new(
        NodeKind::Return {
          expr: Box::new(expr),
        },
        loc,
      ));
    }

    if self.stream.equal("if") {
      self.stream.skip("(")?;
      let cond = self.expr()?;
      self.stream.skip(")")?;
      let then = self.stmt()?;
      let els = if self.stream.equal("else") {
        Some(Box::new(self.stmt()?))
      } else {
        None
      };
      return Ok(Node::new(
        NodeKind::If {
          cond: Box::new(cond),
          then: Box::new(then),
          els,
        },
        loc,
      ));
    }

    if self.stream.equal("for") {
      self.stream.skip("(")?;
      let init = self.optional_expr(";")?.map(|expr| {
        let loc = expr.loc;
        Box::new(Node::expr_stmt(expr, loc))
      });
      let cond = self.optional_expr(";")?.map(Box::new);
      let inc = self.optional_expr(")")?.map(Box::new);
      let then = self.stmt()?;
      return Ok(Node::new(
        NodeKind::For {
          init,
          cond,
          inc,
          then: Box::new(then),
        },
        loc,
      ));
    }

    if self.stream.equal("while") {
      self.stream.skip("(")?;
      let cond = self.expr()?;
      self.stream.skip(")")?;
      let then = self.stmt()?;
      return Ok(Node::new(
        NodeKind::For {
          init: None,
          cond: Some(Box::new(cond)),
          inc: None,
          then: Box::new(then),
        },
        loc,
      ));
    }

    if self.stream.equal("{") {
      let body = self.compound_stmt()?;
      return Ok(Node::block(body, loc));
    }

    self.expr_stmt()
  }

  /// An expression that may be omitted, followed by `terminator`.
  fn optional_expr(&mut self, terminator: &str) -> CompileResult<Option<Node>> {
    if self.stream.equal(terminator) {
      return Ok(None);
    }
    let expr = self.expr()?;
    self.stream.skip(terminator)?;
    Ok(Some(expr))
  }

  fn expr_stmt(&mut self) -> CompileResult<Node> {
    let loc = self.stream.loc();
    if self.stream.equal(";") {
      return Ok(Node::block(Vec::new(), loc));
    }
    let expr = self.expr()?;
    self.stream.skip(";")?;
    Ok(Node::expr_stmt(expr, loc))
  }

  fn expr(&mut self) -> CompileResult<Node> {
    self.assign()
  }

  fn assign(&mut self) -> CompileResult<Node> {
    let node = self.equality()?;

    let loc = self.stream.loc();
    if self.stream.equal("=") {
      let rhs = self.assign()?;
      return Ok(Node::assign(node, rhs, loc));
    }

    Ok(node)
  }

  fn equality(&mut self) -> CompileResult<Node> {
    let mut node = self.relational()?;

    loop {
      let loc = self.stream.loc();
      let op = match self.stream.peek_reserved() {
        Some("==") => BinaryOp::Eq,
        Some("!=") => BinaryOp::Ne,
        _ => break,
      };
      self.stream.advance();
      let rhs = self.relational()?;
      node = Node::binary(op, node, rhs, loc);
    }

    Ok(node)
  }

  fn relational(&mut self) -> CompileResult<Node> {
    let mut node = self.add()?;

    loop {
      let loc = self.stream.loc();
      let op = match self.stream.peek_reserved() {
        Some("<") => BinaryOp::Lt,
        Some("<=") => BinaryOp::Le,
        Some(">") => BinaryOp::Gt,
        Some(">=") => BinaryOp::Ge,
        _ => break,
      };
      self.stream.advance();
      let rhs = self.add()?;
      node = Node::binary(op, node, rhs, loc);
    }

    Ok(node)
  }

  /// `+` with pointer arithmetic: the integer operand is scaled by the
  /// element size, and `num + ptr` is commuted to `ptr + num`.
  fn new_add(&self, mut lhs: Node, mut rhs: Node, loc: usize) -> CompileResult<Node> {
    self.add_type(&mut lhs)?;
    self.add_type(&mut rhs)?;
    let (lhs_ptr, rhs_ptr) = (has_base(&lhs), has_base(&rhs));

    match (lhs_ptr, rhs_ptr) {
      (false, false) => Ok(Node::binary(BinaryOp::Add, lhs, rhs, loc)),
      (true, true) => Err(CompileError::semantic(
        self.source(),
        loc,
        "invalid operands: pointer + pointer",
      )),
      (false, true) => self.new_add(rhs, lhs, loc),
      (true, false) => {
        let scaled = Node::binary(BinaryOp::Mul, rhs, Node::number(ELEMENT_SIZE, loc), loc);
        Ok(Node::binary(BinaryOp::Add, lhs, scaled, loc))
      }
    }
  }

  /// `-` with pointer arithmetic: `ptr - num` scales, `ptr - ptr` yields an
  /// element count.
  fn new_sub(&self, mut lhs: Node, mut rhs: Node, loc: usize) -> CompileResult<Node> {
    self.add_type(&mut lhs)?;
    self.add_type(&mut rhs)?;

    match (has_base(&lhs), has_base(&rhs)) {
      (false, false) => Ok(Node::binary(BinaryOp::Sub, lhs, rhs, loc)),
      (true, false) => {
        let scaled = Node::binary(BinaryOp::Mul, rhs, Node::number(ELEMENT_SIZE, loc), loc);
        Ok(Node::binary(BinaryOp::Sub, lhs, scaled, loc))
      }
      (true, true) => {
        let mut diff = Node::binary(BinaryOp::Sub, lhs, rhs, loc);
        diff.ty = Some(Type::int());
        Ok(Node::binary(
          BinaryOp::Div,
          diff,
          Node::number(ELEMENT_SIZE, loc),
          loc,
        ))
      }
      (false, true) => Err(CompileError::semantic(
        self.source(),
        loc,
        "invalid operands: number - pointer",
      )),
    }
  }

  fn add(&mut self) -> CompileResult<Node> {
    let mut node = self.mul()?;

    loop {
      let loc = self.stream.loc();
      if self.stream.equal("+") {
        let rhs = self.mul()?;
        node = self.new_add(node, rhs, loc)?;
        continue;
      }
      if self.stream.equal("-") {
        let rhs = self.mul()?;
        node = self.new_sub(node, rhs, loc)?;
        continue;
      }
      break;
    }

    Ok(node)
  }

  fn mul(&mut self) -> CompileResult<Node> {
    let mut node = self.unary()?;

    loop {
      let loc = self.stream.loc();
      let op = match self.stream.peek_reserved() {
        Some("*") => BinaryOp::Mul,
        Some("/") => BinaryOp::Div,
        _ => break,
      };
      self.stream.advance();
      let rhs = self.unary()?;
      node = Node::binary(op, node, rhs, loc);
    }

    Ok(node)
  }

  fn unary(&mut self) -> CompileResult<Node> {
    self.nested("expression", Self::unary_operator)
  }

  fn unary_operator(&mut self) -> CompileResult<Node> {
    let loc = self.stream.loc();

    if self.stream.equal("+") {
      return self.unary();
    }

    if self.stream.equal("-") {
      let operand = self.unary()?;
      return self.new_sub(Node::number(0, loc), operand, loc);
    }

    if self.stream.equal("&") {
      let operand = self.unary()?;
      return Ok(Node::addr(operand, loc));
    }

    if self.stream.equal("*") {
      let operand = self.unary()?;
      return Ok(Node::deref(operand, loc));
    }

    self.postfix()
  }

  fn postfix(&mut self) -> CompileResult<Node> {
    let mut node = self.primary()?;

    loop {
      let loc = self.stream.loc();
      if !self.stream.equal("[") {
        break;
      }
      let index = self.expr()?;
      self.stream.skip("]")?;
      node = Node::deref(self.new_add(node, index, loc)?, loc);
    }

    Ok(node)
  }

  fn primary(&mut self) -> CompileResult<Node> {
    let loc = self.stream.loc();

    if self.stream.equal("(") {
      let node = self.expr()?;
      self.stream.skip(")")?;
      return Ok(node);
    }

    if self.stream.peek().map(|token| token.kind) == Some(TokenKind::Ident) {
      let (name, loc) = self.stream.get_ident()?;
      if self.stream.equal("(") {
        return self.funcall(name, loc);
      }
      return match self.find_var(&name) {
        Some(obj) => Ok(Node::var(obj, loc)),
        None => Err(CompileError::semantic(
          self.source(),
          loc,
          format!("undefined variable '{name}'"),
        )),
      };
    }

    let (value, _) = self.stream.get_number()?;
    Ok(Node::number(value, loc))
  }

  /// Arguments of a call whose name and `(` are already consumed.
  fn funcall(&mut self, name: String, loc: usize) -> CompileResult<Node> {
    let mut args = Vec::new();
    if !self.stream.equal(")") {
      loop {
        args.push(self.assign()?);
        if self.stream.equal(")") {
          break;
        }
        self.stream.skip(",")?;
      }
    }

    if args.len() > MAX_ARGS {
      return Err(CompileError::semantic(
        self.source(),
        loc,
        format!("too many arguments (at most {MAX_ARGS})"),
      ));
    }
    Ok(Node::new(NodeKind::Call { name, args }, loc))
  }
}

fn has_base(node: &Node) -> bool {
  node.ty.as_ref().is_some_and(Type::has_base)
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  /// Source offset of the current token (end of input once exhausted).
  fn loc(&self) -> usize {
    self.peek().map_or(self.source.len(), |token| token.loc)
  }

  fn advance(&mut self) {
    if self.pos < self.tokens.len() {
      self.pos += 1;
    }
  }

  /// Text of the current token if it is a keyword or punctuator.
  fn peek_reserved(&self) -> Option<&'a str> {
    self
      .peek()
      .filter(|token| token.kind == TokenKind::Reserved)
      .map(|token| token_text(token, self.source))
  }

  /// Check the current token without consuming it.
  fn is(&self, op: &str) -> bool {
    self.peek_reserved() == Some(op)
  }

  /// Consume the current token if it matches the provided punctuator or keyword.
  fn equal(&mut self, op: &str) -> bool {
    if self.is(op) {
      self.pos += 1;
      return true;
    }
    false
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      let got = describe_token(self.peek(), self.source);
      Err(CompileError::syntax(
        self.source,
        self.loc(),
        format!("expected \"{s}\", but got \"{got}\""),
      ))
    }
  }

  /// Parse the current token as an integer literal returning its value and location.
  fn get_number(&mut self) -> CompileResult<(i64, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Num
    {
      let value = token.value.ok_or_else(|| {
        CompileError::internal(format!("numeric token at {} missing value", token.loc))
      })?;
      let loc = token.loc;
      self.pos += 1;
      return Ok((value, loc));
    }

    let got = describe_token(self.peek(), self.source);
    Err(CompileError::syntax(
      self.source,
      self.loc(),
      format!("expected a number, but got \"{got}\""),
    ))
  }

  /// Parse the current token as an identifier.
  fn get_ident(&mut self) -> CompileResult<(String, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Ident
    {
      let ident = token_text(token, self.source).to_string();
      let loc = token.loc;
      self.pos += 1;
      return Ok((ident, loc));
    }

    let got = describe_token(self.peek(), self.source);
    Err(CompileError::syntax(
      self.source,
      self.loc(),
      format!("expected an identifier, but got \"{got}\""),
    ))
  }

  fn is_eof(&self) -> bool {
    matches!(self.peek().map(|token| token.kind), Some(TokenKind::Eof) | None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokenizer::tokenize;
  use crate::ty::TypeKind;
  use pretty_assertions::assert_eq;

  fn parse_source(source: &str) -> CompileResult<Vec<Function>> {
    parse(tokenize(source)?, source)
  }

  fn parse_main(body: &str) -> Function {
    let source = format!("int main() {{ {body} }}");
    parse_source(&source).unwrap().remove(0)
  }

  /// Compact s-expression rendering of an expression tree.
  fn sexp(node: &Node, func: &Function) -> String {
    match &node.kind {
      NodeKind::Num { value } => value.to_string(),
      NodeKind::Var { obj } => func.locals[*obj].name.clone(),
      NodeKind::Binary { op, lhs, rhs } => {
        format!("({op:?} {} {})", sexp(lhs, func), sexp(rhs, func))
      }
      NodeKind::Assign { lhs, rhs } => format!("(= {} {})", sexp(lhs, func), sexp(rhs, func)),
      NodeKind::Addr { operand } => format!("(& {})", sexp(operand, func)),
      NodeKind::Deref { operand } => format!("(* {})", sexp(operand, func)),
      NodeKind::Call { name, args } => {
        let args: Vec<String> = args.iter().map(|arg| sexp(arg, func)).collect();
        format!("({name} {})", args.join(" "))
      }
      NodeKind::ExprStmt { expr } | NodeKind::Return { expr } => sexp(expr, func),
      other => format!("{other:?}"),
    }
  }

  fn last_expr(body: &str) -> String {
    let func = parse_main(body);
    sexp(func.body.last().unwrap(), &func)
  }

  #[test]
  fn precedence_and_associativity() {
    assert_eq!(last_expr("return 1+2*3;"), "(Add 1 (Mul 2 3))");
    assert_eq!(last_expr("return (1+2)*3;"), "(Mul (Add 1 2) 3)");
    assert_eq!(last_expr("return 8-4-2;"), "(Sub (Sub 8 4) 2)");
    assert_eq!(last_expr("return 1<2==3>=4;"), "(Eq (Lt 1 2) (Ge 3 4))");
    assert_eq!(last_expr("return -3 + +4;"), "(Add (Sub 0 3) 4)");
  }

  #[test]
  fn assignment_is_right_associative() {
    assert_eq!(last_expr("int a; int b; a = b = 3;"), "(= a (= b 3))");
  }

  #[test]
  fn pointer_arithmetic_is_scaled() {
    assert_eq!(
      last_expr("int x; int *p; p + 1;"),
      "(Add p (Mul 1 8))"
    );
    assert_eq!(
      last_expr("int x; int *p; 2 + p;"),
      "(Add p (Mul 2 8))"
    );
    assert_eq!(
      last_expr("int x; int *p; p - 3;"),
      "(Sub p (Mul 3 8))"
    );
    assert_eq!(
      last_expr("int *p; int *q; p - q;"),
      "(Div (Sub p q) 8)"
    );
  }

  #[test]
  fn pointer_difference_is_an_integer() {
    let func = parse_main("int *p; int *q; p - q;");
    match &func.body.last().unwrap().kind {
      NodeKind::ExprStmt { expr } => assert_eq!(expr.ty, Some(Type::int())),
      other => panic!("unexpected node {other:?}"),
    }
  }

  #[test]
  fn invalid_pointer_combinations_are_rejected() {
    let err = parse_source("int main() { int *p; int *q; return p + q; }").unwrap_err();
    assert!(matches!(err, CompileError::Semantic { .. }));
    assert_eq!(err.message(), "invalid operands: pointer + pointer");

    let err = parse_source("int main() { int *p; return 1 - p; }").unwrap_err();
    assert_eq!(err.message(), "invalid operands: number - pointer");

    let err = parse_source("int main() { int x; int *p = &x; return -p; }").unwrap_err();
    assert!(matches!(err, CompileError::Semantic { .. }));
    assert_eq!(err.message(), "invalid operands: number - pointer");
  }

  #[test]
  fn negating_an_integer_still_subtracts_from_zero() {
    assert_eq!(last_expr("return -(1 + 2);"), "(Sub 0 (Add 1 2))");
  }

  #[test]
  fn deeply_nested_expressions_are_rejected() {
    let source = format!(
      "int main() {{ return {}1{}; }}",
      "(".repeat(1000),
      ")".repeat(1000)
    );
    let err = parse_source(&source).unwrap_err();
    assert!(matches!(err, CompileError::Syntax { .. }));
    assert_eq!(err.message(), "expression nested too deeply");

    let source = format!("int main() {{ return {}1; }}", "-".repeat(1000));
    let err = parse_source(&source).unwrap_err();
    assert_eq!(err.message(), "expression nested too deeply");
  }

  #[test]
  fn deeply_nested_blocks_are_rejected() {
    let source = format!("int main() {{ {}{} }}", "{".repeat(1000), "}".repeat(1000));
    let err = parse_source(&source).unwrap_err();
    assert!(matches!(err, CompileError::Syntax { .. }));
    assert_eq!(err.message(), "statement nested too deeply");
  }

  #[test]
  fn moderate_nesting_still_parses() {
    let source = format!(
      "int main() {{ return {}1{}; }}",
      "(".repeat(40),
      ")".repeat(40)
    );
    assert!(parse_source(&source).is_ok());
  }

  #[test]
  fn subscript_desugars_to_dereference() {
    assert_eq!(last_expr("int a[3]; a[1] = 2;"), "(= (* (Add a (Mul 1 8))) 2)");
  }

  #[test]
  fn declarations_lower_initialisers() {
    let func = parse_main("int x = 3, *p = &x, y;");
    assert_eq!(func.locals.len(), 3);
    assert_eq!(func.locals[1].ty, pointer_to(Type::int()));
    match &func.body[0].kind {
      NodeKind::Block { body } => {
        let lowered: Vec<String> = body.iter().map(|stmt| sexp(stmt, &func)).collect();
        assert_eq!(lowered, vec!["(= x 3)", "(= p (& x))"]);
      }
      other => panic!("unexpected node {other:?}"),
    }
  }

  #[test]
  fn redeclaration_reuses_the_variable() {
    let func = parse_main("int x; int x; x = 1;");
    assert_eq!(func.locals.len(), 1);
  }

  #[test]
  fn offsets_follow_declaration_order() {
    let func = parse_main("int a; int b[3]; int *c;");
    let offsets: Vec<i64> = func.locals.iter().map(|var| var.offset).collect();
    assert_eq!(offsets, vec![56, 80, 88]);
    assert_eq!(func.stack_size, 96);
  }

  #[test]
  fn frame_without_locals_still_saves_registers() {
    let func = parse_main("return 0;");
    assert_eq!(func.stack_size, FRAME_SAVE_AREA);
  }

  #[test]
  fn functions_and_parameters() {
    let program =
      parse_source("int add(int a, int *b) { return a + *b; } int main() { return add(1, 2); }")
        .unwrap();
    let names: Vec<&str> = program.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["add", "main"]);

    let add = &program[0];
    assert_eq!(add.params, vec![0, 1]);
    assert_eq!(add.locals[1].ty, pointer_to(Type::int()));
    assert_eq!(add.ty.kind, TypeKind::Func);

    assert_eq!(sexp(&program[1].body[0], &program[1]), "(add 1 2)");
  }

  #[test]
  fn pointer_return_types() {
    let program = parse_source("int **f() { return 0; }").unwrap();
    let ret = program[0].ty.return_ty.as_deref().unwrap();
    assert_eq!(ret, &pointer_to(pointer_to(Type::int())));
  }

  #[test]
  fn array_parameters_decay() {
    let program = parse_source("int f(int a[4]) { return a[0]; }").unwrap();
    assert_eq!(program[0].locals[0].ty, pointer_to(Type::int()));
  }

  #[test]
  fn control_flow_statements() {
    let func = parse_main("int i; for (;;) return 1; while (i) i = i - 1; if (i) 1; else 2;");
    assert!(matches!(
      func.body[1].kind,
      NodeKind::For {
        init: None,
        cond: None,
        inc: None,
        ..
      }
    ));
    assert!(matches!(
      func.body[2].kind,
      NodeKind::For {
        init: None,
        cond: Some(_),
        inc: None,
        ..
      }
    ));
    assert!(matches!(func.body[3].kind, NodeKind::If { els: Some(_), .. }));
  }

  #[test]
  fn undeclared_variables_are_rejected() {
    assert!(parse_source("int main() { int x; x = 1; return x; }").is_ok());

    let err = parse_source("int main() { x = 1; return x; }").unwrap_err();
    assert!(matches!(err, CompileError::Semantic { .. }));
    assert_eq!(err.message(), "undefined variable 'x'");
  }

  #[test]
  fn syntax_errors_point_at_the_found_token() {
    let err = parse_source("int main() { return (1; }").unwrap_err();
    assert!(matches!(err, CompileError::Syntax { .. }));
    assert_eq!(
      err.to_string(),
      "int main() { return (1; }\n                      ^ expected \")\", but got \";\""
    );

    let err = parse_source("int main() { return 1 + ; }").unwrap_err();
    assert_eq!(err.message(), "expected a number, but got \";\"");

    let err = parse_source("int main() { return 1;").unwrap_err();
    assert_eq!(err.message(), "expected \"}\", but got \"EOF\"");

    let err = parse_source("int () {}").unwrap_err();
    assert_eq!(err.message(), "expected an identifier, but got \"(\"");
  }

  #[test]
  fn too_many_arguments() {
    let err = parse_source("int main() { return f(1, 2, 3, 4, 5, 6, 7); }").unwrap_err();
    assert_eq!(err.message(), "too many arguments (at most 6)");
  }

  #[test]
  fn every_expression_is_typed() {
    fn check(node: &Node) {
      match &node.kind {
        NodeKind::Binary { lhs, rhs, .. } | NodeKind::Assign { lhs, rhs } => {
          assert!(node.ty.is_some());
          check(lhs);
          check(rhs);
        }
        NodeKind::Addr { operand } | NodeKind::Deref { operand } => {
          assert!(node.ty.is_some());
          check(operand);
        }
        NodeKind::Return { expr } | NodeKind::ExprStmt { expr } => check(expr),
        NodeKind::Block { body } => body.iter().for_each(check),
        NodeKind::Call { args, .. } => {
          assert!(node.ty.is_some());
          args.iter().for_each(check);
        }
        NodeKind::If { cond, then, els } => {
          check(cond);
          check(then);
          els.iter().for_each(|els| check(els));
        }
        NodeKind::For {
          init,
          cond,
          inc,
          then,
        } => {
          [init, cond, inc].into_iter().flatten().for_each(|n| check(n));
          check(then);
        }
        NodeKind::Var { .. } | NodeKind::Num { .. } => assert!(node.ty.is_some()),
      }
    }

    let func = parse_main(
      "int x; int *p = &x; int a[2]; if (x < 1) { *p = a[1] + f(x); } for (x = 0; x < 3; x = x + 1) p = p + 1; return x;",
    );
    func.body.iter().for_each(check);
  }
}
