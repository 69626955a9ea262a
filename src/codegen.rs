//! Code generation: lower the parsed functions into Intel-syntax x86-64
//! assembly.
//!
//! Expressions are evaluated on an operand stack that lives entirely in six
//! scratch registers (`r10`–`r15`): each value is pushed into the next free
//! register and binary operators fold the top two slots into the lower one.
//! Every function saves all six registers in its frame so callers never lose
//! their live operands across a call.

use crate::error::{CompileError, CompileResult};
use crate::parser::{BinaryOp, FRAME_SAVE_AREA, Function, MAX_ARGS, Node, NodeKind};
use crate::ty::Type;

const SCRATCH_REGS: [&str; 6] = ["r10", "r11", "r12", "r13", "r14", "r15"];
const ARG_REGS: [&str; MAX_ARGS] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

macro_rules! emit {
  ($cg:expr, $($arg:tt)*) => {{
    $cg.asm.push_str(&format!($($arg)*));
    $cg.asm.push('\n');
  }};
}

/// Emit assembly for a whole translation unit.
pub fn generate(program: &[Function], source: &str) -> CompileResult<String> {
  let mut cg = CodeGen {
    source,
    asm: String::new(),
    top: 0,
    label_seq: 0,
  };

  emit!(cg, ".intel_syntax noprefix");
  for func in program {
    cg.function(func)?;
  }
  Ok(cg.asm)
}

fn reg(idx: usize) -> CompileResult<&'static str> {
  SCRATCH_REGS
    .get(idx)
    .copied()
    .ok_or_else(|| CompileError::internal(format!("register out of range: {idx}")))
}

/// Frame slot holding the saved copy of scratch register `idx`.
fn save_slot(idx: usize) -> i64 {
  (idx as i64 + 1) * 8
}

struct CodeGen<'a> {
  source: &'a str,
  asm: String,
  /// Operand stack depth: index of the next free scratch register.
  top: usize,
  /// Shared by all functions so labels stay unique in the output.
  label_seq: usize,
}

impl CodeGen<'_> {
  fn push(&mut self) -> CompileResult<&'static str> {
    let r = reg(self.top)?;
    self.top += 1;
    Ok(r)
  }

  fn pop(&mut self) -> CompileResult<&'static str> {
    self.top = self
      .top
      .checked_sub(1)
      .ok_or_else(|| CompileError::internal("operand stack underflow"))?;
    reg(self.top)
  }

  fn peek(&self) -> CompileResult<&'static str> {
    match self.top.checked_sub(1) {
      Some(idx) => reg(idx),
      None => Err(CompileError::internal("operand stack is empty")),
    }
  }

  fn next_label(&mut self) -> usize {
    self.label_seq += 1;
    self.label_seq
  }

  fn function(&mut self, func: &Function) -> CompileResult<()> {
    if FRAME_SAVE_AREA < save_slot(SCRATCH_REGS.len() - 1) {
      return Err(CompileError::internal("frame save area too small"));
    }

    emit!(self, ".global {}", func.name);
    emit!(self, "{}:", func.name);

    // Prologue
    emit!(self, "  push rbp");
    emit!(self, "  mov rbp, rsp");
    emit!(self, "  sub rsp, {}", func.stack_size);
    for (idx, r) in SCRATCH_REGS.iter().enumerate() {
      emit!(self, "  mov [rbp-{}], {r}", save_slot(idx));
    }

    for (&param, arg) in func.params.iter().zip(ARG_REGS) {
      let var = func.locals.get(param).ok_or_else(|| {
        CompileError::internal(format!("parameter {param} of {} has no local", func.name))
      })?;
      emit!(self, "  mov [rbp-{}], {arg}", var.offset);
    }

    for stmt in &func.body {
      self.gen_stmt(stmt, func)?;
      if self.top != 0 {
        return Err(CompileError::internal(format!(
          "operand stack depth is {} after a statement in {}",
          self.top, func.name
        )));
      }
    }

    // Epilogue
    emit!(self, ".L.return.{}:", func.name);
    for (idx, r) in SCRATCH_REGS.iter().enumerate() {
      emit!(self, "  mov {r}, [rbp-{}]", save_slot(idx));
    }
    emit!(self, "  mov rsp, rbp");
    emit!(self, "  pop rbp");
    emit!(self, "  ret");
    Ok(())
  }

  /// Push the address of an lvalue.
  fn gen_addr(&mut self, node: &Node, func: &Function) -> CompileResult<()> {
    match &node.kind {
      NodeKind::Var { obj } => {
        let offset = func
          .locals
          .get(*obj)
          .map(|var| var.offset)
          .ok_or_else(|| CompileError::internal(format!("unknown local index {obj}")))?;
        let r = self.push()?;
        emit!(self, "  lea {r}, [rbp-{offset}]");
        Ok(())
      }
      NodeKind::Deref { operand } => self.gen_expr(operand, func),
      _ => Err(CompileError::semantic(self.source, node.loc, "not an lvalue")),
    }
  }

  /// Replace the address on top of the stack with the value it points to.
  /// Arrays stay as addresses, which is how they decay to pointers.
  fn load(&mut self, ty: Option<&Type>) -> CompileResult<()> {
    if ty.is_some_and(Type::is_array) {
      return Ok(());
    }
    let r = self.peek()?;
    emit!(self, "  mov {r}, [{r}]");
    Ok(())
  }

  /// Pop an address and store the value below it there; the value stays.
  fn store(&mut self) -> CompileResult<()> {
    let addr = self.pop()?;
    let value = self.peek()?;
    emit!(self, "  mov [{addr}], {value}");
    Ok(())
  }

  fn gen_expr(&mut self, node: &Node, func: &Function) -> CompileResult<()> {
    match &node.kind {
      NodeKind::Num { value } => {
        let r = self.push()?;
        emit!(self, "  mov {r}, {value}");
        Ok(())
      }
      NodeKind::Var { .. } => {
        self.gen_addr(node, func)?;
        self.load(node.ty.as_ref())
      }
      NodeKind::Deref { operand } => {
        self.gen_expr(operand, func)?;
        self.load(node.ty.as_ref())
      }
      NodeKind::Addr { operand } => self.gen_addr(operand, func),
      NodeKind::Assign { lhs, rhs } => {
        if lhs.ty.as_ref().is_some_and(Type::is_array) {
          return Err(CompileError::semantic(
            self.source,
            node.loc,
            "cannot assign to an array",
          ));
        }
        self.gen_expr(rhs, func)?;
        self.gen_addr(lhs, func)?;
        self.store()
      }
      NodeKind::Call { name, args } => self.gen_call(name, args, func),
      NodeKind::Binary { op, lhs, rhs } => {
        self.gen_expr(lhs, func)?;
        self.gen_expr(rhs, func)?;
        let rs = self.pop()?;
        let rd = self.peek()?;
        self.gen_binary(*op, rd, rs);
        Ok(())
      }
      NodeKind::Return { .. }
      | NodeKind::If { .. }
      | NodeKind::For { .. }
      | NodeKind::Block { .. }
      | NodeKind::ExprStmt { .. } => Err(CompileError::internal(format!(
        "statement reached expression codegen: {:?}",
        node.kind
      ))),
    }
  }

  /// `rd = rd <op> rs`.
  fn gen_binary(&mut self, op: BinaryOp, rd: &str, rs: &str) {
    let setcc = match op {
      BinaryOp::Add => {
        emit!(self, "  add {rd}, {rs}");
        return;
      }
      BinaryOp::Sub => {
        emit!(self, "  sub {rd}, {rs}");
        return;
      }
      BinaryOp::Mul => {
        emit!(self, "  imul {rd}, {rs}");
        return;
      }
      BinaryOp::Div => {
        emit!(self, "  mov rax, {rd}");
        // RDX:RAX <- sign extension of RAX
        emit!(self, "  cqo");
        emit!(self, "  idiv {rs}");
        emit!(self, "  mov {rd}, rax");
        return;
      }
      BinaryOp::Eq => "sete",
      BinaryOp::Ne => "setne",
      BinaryOp::Lt => "setl",
      BinaryOp::Le => "setle",
      BinaryOp::Gt => "setg",
      BinaryOp::Ge => "setge",
    };
    emit!(self, "  cmp {rd}, {rs}");
    emit!(self, "  {setcc} al");
    emit!(self, "  movzx {rd}, al");
  }

  fn gen_call(&mut self, name: &str, args: &[Node], func: &Function) -> CompileResult<()> {
    if args.len() > MAX_ARGS {
      return Err(CompileError::internal(format!(
        "call to {name} has {} arguments",
        args.len()
      )));
    }

    // r10 and r11 are caller-saved and may hold live operands.
    for r in SCRATCH_REGS {
      emit!(self, "  push {r}");
    }
    for arg in args {
      self.gen_expr(arg, func)?;
    }
    for arg_reg in ARG_REGS[..args.len()].iter().rev() {
      let r = self.pop()?;
      emit!(self, "  mov {arg_reg}, {r}");
    }
    emit!(self, "  mov rax, 0");
    emit!(self, "  call {name}");
    for r in SCRATCH_REGS.iter().rev() {
      emit!(self, "  pop {r}");
    }

    let r = self.push()?;
    emit!(self, "  mov {r}, rax");
    Ok(())
  }

  /// Evaluate a condition and jump to `target` when it is zero.
  fn gen_branch_if_zero(&mut self, cond: &Node, func: &Function, target: &str) -> CompileResult<()> {
    self.gen_expr(cond, func)?;
    let r = self.pop()?;
    emit!(self, "  cmp {r}, 0");
    emit!(self, "  je {target}");
    Ok(())
  }

  fn gen_stmt(&mut self, node: &Node, func: &Function) -> CompileResult<()> {
    match &node.kind {
      NodeKind::ExprStmt { expr } => {
        self.gen_expr(expr, func)?;
        self.pop()?;
        Ok(())
      }
      NodeKind::Return { expr } => {
        self.gen_expr(expr, func)?;
        let r = self.pop()?;
        emit!(self, "  mov rax, {r}");
        emit!(self, "  jmp .L.return.{}", func.name);
        Ok(())
      }
      NodeKind::Block { body } => {
        for stmt in body {
          self.gen_stmt(stmt, func)?;
        }
        Ok(())
      }
      NodeKind::If { cond, then, els } => {
        let seq = self.next_label();
        match els {
          Some(els) => {
            self.gen_branch_if_zero(cond, func, &format!(".L.else.{seq}"))?;
            self.gen_stmt(then, func)?;
            emit!(self, "  jmp .L.end.{seq}");
            emit!(self, ".L.else.{seq}:");
            self.gen_stmt(els, func)?;
          }
          None => {
            self.gen_branch_if_zero(cond, func, &format!(".L.end.{seq}"))?;
            self.gen_stmt(then, func)?;
          }
        }
        emit!(self, ".L.end.{seq}:");
        Ok(())
      }
      NodeKind::For {
        init,
        cond,
        inc,
        then,
      } => {
        let seq = self.next_label();
        if let Some(init) = init {
          self.gen_stmt(init, func)?;
        }
        emit!(self, ".L.begin.{seq}:");
        if let Some(cond) = cond {
          self.gen_branch_if_zero(cond, func, &format!(".L.end.{seq}"))?;
        }
        self.gen_stmt(then, func)?;
        if let Some(inc) = inc {
          self.gen_expr(inc, func)?;
          self.pop()?;
        }
        emit!(self, "  jmp .L.begin.{seq}");
        emit!(self, ".L.end.{seq}:");
        Ok(())
      }
      _ => Err(CompileError::internal(format!(
        "expression reached statement codegen: {:?}",
        node.kind
      ))),
    }
  }
}
