//! Type constructors and the inference pass that annotates expression nodes.
//!
//! Only one scalar type exists, so every integer and pointer is 8 bytes wide.
//! Inference is memoised: a node that already carries a type is left alone,
//! which lets the parser call `add_type` eagerly on sub-trees and again on the
//! finished statement without changing any annotation.

use crate::error::{CompileError, CompileResult};
use crate::parser::{Node, NodeKind, Obj};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
  Int,
  Ptr,
  Array,
  Func,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
  pub kind: TypeKind,
  /// Size in bytes as laid out in a stack frame.
  pub size: i64,
  /// Pointee for pointers, element type for arrays.
  pub base: Option<Box<Type>>,
  pub array_len: i64,
  pub return_ty: Option<Box<Type>>,
}

impl Type {
  pub fn int() -> Self {
    Self {
      kind: TypeKind::Int,
      size: 8,
      base: None,
      array_len: 0,
      return_ty: None,
    }
  }

  pub fn pointer_to(base: Type) -> Self {
    Self {
      kind: TypeKind::Ptr,
      size: 8,
      base: Some(Box::new(base)),
      array_len: 0,
      return_ty: None,
    }
  }

  pub fn array_of(base: Type, len: i64) -> Self {
    Self {
      kind: TypeKind::Array,
      size: base.size * len,
      base: Some(Box::new(base)),
      array_len: len,
      return_ty: None,
    }
  }

  pub fn func(return_ty: Type) -> Self {
    Self {
      kind: TypeKind::Func,
      size: 8,
      base: None,
      array_len: 0,
      return_ty: Some(Box::new(return_ty)),
    }
  }

  pub fn is_array(&self) -> bool {
    matches!(self.kind, TypeKind::Array)
  }

  /// Pointer arithmetic treats anything with a base (pointer or array) alike.
  pub fn has_base(&self) -> bool {
    self.base.is_some()
  }

  pub fn base(&self) -> Option<&Type> {
    self.base.as_deref()
  }
}

pub fn pointer_to(base: Type) -> Type {
  Type::pointer_to(base)
}

fn type_of(node: &Node) -> CompileResult<&Type> {
  node
    .ty
    .as_ref()
    .ok_or_else(|| CompileError::internal("operand has no type after inference"))
}

/// Annotate `node` and all of its descendants with their types.
pub fn add_type(node: &mut Node, locals: &[Obj], source: &str) -> CompileResult<()> {
  if node.ty.is_some() {
    return Ok(());
  }

  match &mut node.kind {
    NodeKind::Binary { lhs, rhs, .. } | NodeKind::Assign { lhs, rhs } => {
      add_type(lhs, locals, source)?;
      add_type(rhs, locals, source)?;
    }
    NodeKind::Addr { operand }
    | NodeKind::Deref { operand }
    | NodeKind::Return { expr: operand }
    | NodeKind::ExprStmt { expr: operand } => add_type(operand, locals, source)?,
    NodeKind::If { cond, then, els } => {
      add_type(cond, locals, source)?;
      add_type(then, locals, source)?;
      if let Some(els) = els {
        add_type(els, locals, source)?;
      }
    }
    NodeKind::For {
      init,
      cond,
      inc,
      then,
    } => {
      for child in [init, cond, inc].into_iter().flatten() {
        add_type(child, locals, source)?;
      }
      add_type(then, locals, source)?;
    }
    NodeKind::Block { body } => {
      for stmt in body {
        add_type(stmt, locals, source)?;
      }
    }
    NodeKind::Call { args, .. } => {
      for arg in args {
        add_type(arg, locals, source)?;
      }
    }
    NodeKind::Var { .. } | NodeKind::Num { .. } => {}
  }

  node.ty = match &node.kind {
    NodeKind::Binary { op, lhs, .. } => {
      if op.is_comparison() {
        Some(Type::int())
      } else {
        Some(type_of(lhs)?.clone())
      }
    }
    NodeKind::Assign { lhs, .. } => Some(type_of(lhs)?.clone()),
    NodeKind::Num { .. } | NodeKind::Call { .. } => Some(Type::int()),
    NodeKind::Var { obj } => {
      let var = locals
        .get(*obj)
        .ok_or_else(|| CompileError::internal(format!("unknown local index {obj}")))?;
      Some(var.ty.clone())
    }
    NodeKind::Addr { operand } => {
      let ty = type_of(operand)?;
      match ty.base() {
        Some(base) if ty.is_array() => Some(pointer_to(base.clone())),
        _ => Some(pointer_to(ty.clone())),
      }
    }
    NodeKind::Deref { operand } => match type_of(operand)?.base() {
      Some(base) => Some(base.clone()),
      None => {
        return Err(CompileError::semantic(
          source,
          node.loc,
          "invalid pointer dereference",
        ));
      }
    },
    NodeKind::Return { .. }
    | NodeKind::If { .. }
    | NodeKind::For { .. }
    | NodeKind::Block { .. }
    | NodeKind::ExprStmt { .. } => None,
  };

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::BinaryOp;
  use pretty_assertions::assert_eq;

  fn local(name: &str, ty: Type) -> Obj {
    Obj {
      name: name.to_string(),
      ty,
      offset: 0,
    }
  }

  #[test]
  fn sizes() {
    assert_eq!(Type::int().size, 8);
    assert_eq!(pointer_to(Type::int()).size, 8);
    assert_eq!(Type::array_of(Type::int(), 5).size, 40);
    assert_eq!(Type::array_of(Type::int(), 5).array_len, 5);
  }

  #[test]
  fn comparisons_are_int_and_arithmetic_follows_lhs() {
    let locals = vec![local("p", pointer_to(Type::int()))];
    let mut cmp = Node::binary(BinaryOp::Lt, Node::var(0, 0), Node::number(1, 0), 0);
    add_type(&mut cmp, &locals, "").unwrap();
    assert_eq!(cmp.ty, Some(Type::int()));

    let mut sum = Node::binary(BinaryOp::Add, Node::var(0, 0), Node::number(1, 0), 0);
    add_type(&mut sum, &locals, "").unwrap();
    assert_eq!(sum.ty, Some(pointer_to(Type::int())));
  }

  #[test]
  fn address_of_array_decays_to_element_pointer() {
    let locals = vec![local("a", Type::array_of(Type::int(), 3))];
    let mut node = Node::addr(Node::var(0, 0), 0);
    add_type(&mut node, &locals, "").unwrap();
    assert_eq!(node.ty, Some(pointer_to(Type::int())));
  }

  #[test]
  fn dereference_takes_the_base() {
    let locals = vec![local("pp", pointer_to(pointer_to(Type::int())))];
    let mut node = Node::deref(Node::var(0, 0), 0);
    add_type(&mut node, &locals, "").unwrap();
    assert_eq!(node.ty, Some(pointer_to(Type::int())));
  }

  #[test]
  fn dereferencing_an_integer_is_rejected() {
    let locals = vec![local("x", Type::int())];
    let mut node = Node::deref(Node::var(0, 2), 1);
    let err = add_type(&mut node, &locals, " *x").unwrap_err();
    assert!(matches!(err, CompileError::Semantic { .. }));
    assert_eq!(err.message(), "invalid pointer dereference");
  }

  #[test]
  fn statements_carry_no_type() {
    let mut node = Node::expr_stmt(Node::number(3, 0), 0);
    add_type(&mut node, &[], "").unwrap();
    assert_eq!(node.ty, None);
    match &node.kind {
      NodeKind::ExprStmt { expr } => assert_eq!(expr.ty, Some(Type::int())),
      other => panic!("unexpected node {other:?}"),
    }
  }

  #[test]
  fn inference_is_idempotent() {
    let locals = vec![local("p", pointer_to(Type::int()))];
    let mut node = Node::expr_stmt(
      Node::assign(
        Node::deref(Node::var(0, 0), 0),
        Node::binary(BinaryOp::Mul, Node::number(2, 0), Node::number(3, 0), 0),
        0,
      ),
      0,
    );
    add_type(&mut node, &locals, "").unwrap();
    let first = format!("{node:?}");
    add_type(&mut node, &locals, "").unwrap();
    assert_eq!(format!("{node:?}"), first);
  }

  #[test]
  fn existing_annotations_are_kept() {
    let locals = vec![local("p", pointer_to(Type::int()))];
    let mut node = Node::binary(BinaryOp::Sub, Node::var(0, 0), Node::var(0, 0), 0);
    node.ty = Some(Type::int());
    add_type(&mut node, &locals, "").unwrap();
    assert_eq!(node.ty, Some(Type::int()));
  }
}
