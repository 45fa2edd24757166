//! Recursive-descent parser for declarations and expressions.
//!
//! The compiler collects the items of one statement (tokens, with type
//! names already resolved) and hands them to [`parse`] together with the
//! statement's [`Frame`]. Productions call each other in a fixed order:
//!
//! modifiers → declaration → comma list → post modifiers → assignment →
//! function declarator → additive → multiplicative → reference (`& * @ $`)
//! → sign → increment → subscript → parenthesis or tuple type → primary.
//!
//! Every production returns `Result<_, Diagnostic>`; the first error aborts
//! the statement. Declarations are registered with the compiler as each
//! declarator completes, and literal arithmetic is folded on the way up.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::compiler::Registry;
use crate::context::{Dim, Frame, Modifier, is_reserved};
use crate::diagnostics::Diagnostic;
use crate::scope::{Scope, ScopeKind};
use crate::source::Position;
use crate::tokenizer::{Token, TokenKind, parse_hex};
use crate::ty::{AggregateKind, Indirection, TypeId};

pub type PResult<T> = Result<T, Diagnostic>;

/// One element of a statement as collected by the compiler.
#[derive(Debug, Clone)]
pub enum Item {
  Token(Token),
  /// A type name, or an aggregate introduced by keyword.
  Type {
    ty: TypeId,
    text: String,
    pos: Position,
    /// The aggregate body (or forward declaration) was written here.
    definition: bool,
  },
}

impl Item {
  pub fn pos(&self) -> &Position {
    match self {
      Item::Token(token) => &token.pos,
      Item::Type { pos, .. } => pos,
    }
  }

  pub fn text(&self) -> &str {
    match self {
      Item::Token(token) => &token.text,
      Item::Type { text, .. } => text,
    }
  }

  pub fn is(&self, text: &str) -> bool {
    matches!(self, Item::Token(token) if token.is(text))
  }

  fn token(&self) -> Option<&Token> {
    match self {
      Item::Token(token) => Some(token),
      Item::Type { .. } => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Mod,
}

impl BinaryOp {
  fn from_operator(text: &str) -> Option<Self> {
    match text {
      "+" => Some(Self::Add),
      "-" => Some(Self::Sub),
      "*" => Some(Self::Mul),
      "/" => Some(Self::Div),
      "%" => Some(Self::Mod),
      _ => None,
    }
  }

  /// Fold two constants; `None` on division by zero.
  fn fold(self, lhs: &BigInt, rhs: &BigInt) -> Option<BigInt> {
    match self {
      Self::Add => Some(lhs + rhs),
      Self::Sub => Some(lhs - rhs),
      Self::Mul => Some(lhs * rhs),
      Self::Div | Self::Mod if rhs.is_zero() => None,
      Self::Div => Some(lhs / rhs),
      Self::Mod => Some(lhs % rhs),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOp {
  Increment,
  Decrement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
  Literal(BigInt),
  Var {
    name: String,
    memory_offset: Option<usize>,
    storage_slot: Option<usize>,
  },
  Unary {
    op: UnaryOp,
    operand: Box<Expr>,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  /// `op` is set for compound assignments; `value` is then the combined
  /// right-hand side.
  Assign {
    op: Option<BinaryOp>,
    target: Box<Expr>,
    value: Box<Expr>,
  },
  Step {
    op: StepOp,
    prefix: bool,
    amount: usize,
    target: Box<Expr>,
  },
  AddressOf(Box<Expr>),
  Deref(Box<Expr>),
  Index {
    base: Box<Expr>,
    index: Box<Expr>,
  },
  /// A type in expression position (tuple members, type dimensions).
  Type,
  List(Vec<Expr>),
  Declaration {
    name: String,
  },
  Empty,
}

/// Expression node with its resolved type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
  pub kind: ExprKind,
  pub ty: TypeId,
  pub pos: Position,
  pub lvalue: bool,
}

impl Expr {
  fn new(kind: ExprKind, ty: TypeId, pos: Position) -> Self {
    Self {
      kind,
      ty,
      pos,
      lvalue: false,
    }
  }

  pub fn literal(value: BigInt, ty: TypeId, pos: Position) -> Self {
    Self::new(ExprKind::Literal(value), ty, pos)
  }

  pub fn value(&self) -> Option<&BigInt> {
    match &self.kind {
      ExprKind::Literal(value) => Some(value),
      _ => None,
    }
  }

  pub fn is_constant(&self) -> bool {
    self.value().is_some()
  }

  pub fn is_type(&self) -> bool {
    matches!(self.kind, ExprKind::Type)
  }

  /// Type list or type, as accepted for tuple types.
  fn types(&self) -> Option<Vec<TypeId>> {
    match &self.kind {
      ExprKind::Type => Some(vec![self.ty]),
      ExprKind::List(items) if items.first().is_some_and(Expr::is_type) => {
        Some(items.iter().map(|e| e.ty).collect())
      }
      _ => None,
    }
  }
}

const ASSIGNMENT_OPERATORS: [&str; 12] = [
  "=", "+=", "-=", "*=", "/=", "%=", "<<=", ">>=", "&=", "|=", "&&=", "||=",
];

#[derive(Clone, Copy)]
enum Side {
  Left,
  Right,
}

#[derive(Clone, Copy)]
enum Arity {
  Unary,
  Binary,
}

/// Parse one collected statement. Errors are reported through the
/// registry's sink and mark the frame failed.
pub fn parse(items: &[Item], end: &Token, frame: &mut Frame, reg: &mut Registry) -> Option<Expr> {
  let mut parser = Parser::new(items, end, reg);
  let result = if frame.attr.is_some() || frame.typedef {
    parser.declaration(frame)
  } else {
    parser.pre_modifier(frame)
  };

  match result {
    Ok(expr) => {
      if parser.pos < items.len() {
        let item = &items[parser.pos];
        reg.diags.error(
          item.pos(),
          format!("unexpected token in expression: '{}'", item.text()),
        );
        frame.failed = true;
      }
      Some(expr)
    }
    Err(diag) => {
      reg.diags.push(diag);
      frame.failed = true;
      None
    }
  }
}

struct Parser<'a, 'r> {
  items: &'a [Item],
  end: &'a Token,
  pos: usize,
  reg: &'r mut Registry,
}

impl<'a, 'r> Parser<'a, 'r> {
  fn new(items: &'a [Item], end: &'a Token, reg: &'r mut Registry) -> Self {
    Self {
      items,
      end,
      pos: 0,
      reg,
    }
  }

  // Cursor

  fn peek(&self) -> Option<&'a Item> {
    self.items.get(self.pos)
  }

  fn peek_token(&self) -> Option<&'a Token> {
    self.peek().and_then(Item::token)
  }

  fn next_is_type(&self) -> bool {
    matches!(self.items.get(self.pos + 1), Some(Item::Type { .. }))
  }

  fn current_is(&self, text: &str) -> bool {
    match self.peek() {
      Some(item) => item.is(text),
      None => self.end.is(text),
    }
  }

  fn current_text(&self) -> &'a str {
    match self.peek() {
      Some(item) => item.text(),
      None => &self.end.text,
    }
  }

  fn current_pos(&self) -> &'a Position {
    match self.peek() {
      Some(item) => item.pos(),
      None => &self.end.pos,
    }
  }

  fn is_end(&self, ctx: &Frame) -> bool {
    match self.peek() {
      Some(Item::Token(token)) => ctx.is_end(token),
      Some(Item::Type { .. }) => false,
      None => ctx.is_end(self.end),
    }
  }

  fn expect(&mut self, text: &str) -> PResult<()> {
    if self.current_is(text) && self.peek().is_some() {
      self.pos += 1;
      return Ok(());
    }
    if self.peek().is_none() && self.end.is_eof() {
      return Err(Diagnostic::error(
        &self.end.pos,
        format!("unexpected end of file when '{text}' expected"),
      ));
    }
    Err(self.unexpected(&format!("'{text}'")))
  }

  fn unexpected(&self, what: &str) -> Diagnostic {
    Diagnostic::error(
      self.current_pos(),
      format!("unexpected token when {what} expected: '{}'", self.current_text()),
    )
  }

  fn type_name(&self, ty: TypeId) -> &str {
    self.reg.types.name(ty)
  }

  // Declarations

  fn pre_modifier(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    self.modifiers(ctx)?;
    if ctx.param {
      self.post_modifier(ctx)
    } else {
      self.declaration(ctx)
    }
  }

  fn modifiers(&mut self, ctx: &mut Frame) -> PResult<()> {
    loop {
      let Some(token) = self.peek_token() else {
        return Ok(());
      };
      let Some(modifier) = Modifier::from_keyword(&token.text) else {
        return Ok(());
      };
      self.pos += 1;

      if let Some(other) = ctx.modifiers.conflict(modifier) {
        return Err(Diagnostic::error(
          &token.pos,
          format!(
            "modifier '{}' conflicts with modifier '{}'",
            modifier.keyword(),
            other.keyword()
          ),
        ));
      }
      if ctx.modifiers.has(modifier) {
        self
          .reg
          .diags
          .warning(&token.pos, format!("repeated modifier: '{}'", modifier.keyword()));
      }
      ctx.set_declaration();
      ctx.modifiers.set(modifier, token.pos.clone());
    }
  }

  fn declaration(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    if self.current_is("(") && self.next_is_type() {
      ctx.set_declaration();
      self.round(ctx)?;
      return self.declarators(ctx);
    }

    match self.peek() {
      Some(&Item::Type {
        ty,
        ref pos,
        definition,
        ..
      }) => {
        if ty == TypeId::AUTO {
          let place = if ctx.attr.is_some() {
            Some("attributes")
          } else if ctx.param {
            Some("parameters")
          } else if ctx.typedef {
            Some("typedef")
          } else {
            None
          };
          if let Some(place) = place {
            return Err(Diagnostic::error(
              pos,
              format!("type auto not allowed for {place}"),
            ));
          }
        }
        ctx.set_declaration();
        ctx.ty = Some(ty);
        ctx.type_pos = Some(pos.clone());
        ctx.definition = definition;
        self.pos += 1;
        self.declarators(ctx)
      }
      Some(Item::Token(token)) if ctx.declaration && (ctx.param || !ctx.is_end(token)) => {
        let message = if !token.is_symbol() {
          format!("unexpected token when type expected: '{}'", token.text)
        } else if is_reserved(&token.text) {
          format!("unexpected reserved token when type expected: '{}'", token.text)
        } else {
          format!("unknown type name: '{}'", token.text)
        };
        Err(Diagnostic::error(&token.pos, message))
      }
      _ => self.declarators(ctx),
    }
  }

  fn declarators(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    if ctx.param || ctx.typeonly {
      self.reference(ctx)
    } else {
      self.comma(ctx)
    }
  }

  fn comma(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    let first = self.comma_item(ctx)?;
    let mut list: Vec<Expr> = Vec::new();

    while self.current_is(",") && self.peek().is_some() {
      if ctx.attr.is_some() {
        return Err(self.unexpected("';'"));
      }
      self.pos += 1;
      ctx.remove_end("{");

      let item = self.comma_item(ctx)?;
      if list.is_empty() {
        if first.is_type() {
          if ctx.attr.is_some() {
            return Err(Diagnostic::error(
              self.current_pos(),
              "type list not allowed for attributes",
            ));
          }
          if ctx.param {
            return Err(Diagnostic::error(
              self.current_pos(),
              "type list not allowed for parameters",
            ));
          }
        }
        list.push(first.clone());
      }
      if list[0].is_type() && !item.is_type() {
        return Err(Diagnostic::error(
          self.current_pos(),
          "unexpected expression when type expected",
        ));
      }
      if item.is_type() && !list[0].is_type() {
        return Err(Diagnostic::error(
          self.current_pos(),
          "unexpected type when expression expected",
        ));
      }
      list.push(item);
    }

    if list.is_empty() {
      return Ok(first);
    }
    let last = list.last().map(|e| e.ty).unwrap_or(first.ty);
    Ok(Expr::new(ExprKind::List(list), last, first.pos))
  }

  fn comma_item(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    let mut sub = ctx.child();

    if ctx.typeonly {
      let result = self.declaration(&mut sub);
      ctx.absorb(&sub);
      let pos = self.current_pos().clone();
      result?;
      if !self.is_end(ctx) {
        return Err(self.unexpected("',' or ')'"));
      }
      return Ok(Expr::new(
        ExprKind::Type,
        sub.ty.unwrap_or(TypeId::VOID),
        sub.type_pos.unwrap_or(pos),
      ));
    }

    if !ctx.declaration {
      return self.assignment(ctx);
    }

    let result = if ctx.typedef || ctx.attr == Some(AggregateKind::Struct) {
      self.reference(&mut sub)
    } else if ctx.attr.is_some() {
      self.literal(&mut sub)
    } else if ctx.param {
      self.pre_modifier(&mut sub)
    } else {
      self.post_modifier(&mut sub)
    };
    ctx.absorb(&sub);
    let expr = result?;

    if !self.is_end(ctx) {
      return Err(self.unexpected(ctx.expected()));
    }

    let at = self.current_pos().clone();
    if ctx.typedef {
      self.reg.add_typedef(&mut sub, &at);
    } else if sub.function.is_some() {
      if let Some(signature) = self.reg.add_function(&mut sub) {
        ctx.body = Some(signature);
      }
    } else {
      self.reg.add_variable(&mut sub, &at);
    }
    ctx.absorb(&sub);

    Ok(expr)
  }

  fn post_modifier(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    let left = self.assignment(ctx)?;
    self.modifiers(ctx)?;
    if self.peek().is_none() && self.end.is("{") {
      ctx.defined = true;
    }
    Ok(left)
  }

  fn assignment(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    let mut left = if !ctx.declaration {
      self.additive(ctx)?
    } else if ctx.param {
      self.declaration(ctx)?
    } else {
      self.function(ctx)?
    };

    let Some(op) = self
      .peek_token()
      .filter(|t| t.is_operator() && ASSIGNMENT_OPERATORS.contains(&t.text.as_str()))
    else {
      return Ok(left);
    };
    if ctx.declaration && op.is("=") && !ctx.dims.is_empty() {
      return Err(Diagnostic::error(&op.pos, "arrays can't be initialized"));
    }
    self.pos += 1;

    let mut sub = ctx.child();
    sub.declaration = false;
    sub.typeonly = false;
    let right = self.assignment(&mut sub);
    ctx.absorb(&sub);
    let right = right?;

    if ctx.declaration {
      if !op.is("=") {
        return Err(Diagnostic::error(
          &op.pos,
          format!("unexpected operator when '=' expected: '{}'", op.text),
        ));
      }
      ctx.value = right.value().cloned();
    }

    let compound = match op.text.as_str() {
      "=" => None,
      text => match BinaryOp::from_operator(&text[..text.len() - 1]) {
        Some(binary) => Some(binary),
        None => {
          return Err(Diagnostic::error(
            &op.pos,
            format!("operator not yet implemented: '{}'", op.text),
          ));
        }
      },
    };

    if !left.lvalue {
      return Err(Diagnostic::error(
        &op.pos,
        format!("left operand of operator '{}' is not an lvalue", op.text),
      ));
    }

    if ctx.declaration && left.ty == TypeId::AUTO {
      left.ty = right.ty;
      ctx.ty = Some(right.ty);
    }

    let value = match compound {
      Some(binary) => self.binary(binary, op, left.clone(), right)?,
      None => right,
    };
    self.check_assignment(left.ty, value.ty, &op.pos)?;

    let (ty, pos) = (left.ty, left.pos.clone());
    Ok(Expr::new(
      ExprKind::Assign {
        op: compound,
        target: Box::new(left),
        value: Box::new(value),
      },
      ty,
      pos,
    ))
  }

  fn check_assignment(&mut self, target: TypeId, source: TypeId, at: &Position) -> PResult<()> {
    let types = &self.reg.types;
    let mut warnings = Vec::new();

    if types.is_integer(target) && types.is_integer(source) {
      if !types.is_signed(target) && types.is_signed(source) {
        warnings.push("type sign mismatch in assignment");
      }
    } else if types.is_bytes(target) && types.is_bytes(source) {
    } else if types.is_pointer(target) && types.is_pointer(source) {
      if types.short(target) != types.short(source) {
        warnings.push("pointer type mismatch in assignment");
      }
    } else if target != source {
      return Err(Diagnostic::error(at, "types mismatch in assignment"));
    }
    if types.size(source) > types.size(target) {
      warnings.push("type size mismatch in assignment");
    }

    for warning in warnings {
      self.reg.diags.warning(at, warning);
    }
    Ok(())
  }

  fn function(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    let left = self.reference(ctx)?;

    if self.current_is("(") && self.peek().is_some() {
      self.pos += 1;
      self.reg.scopes.push(Scope::new(ScopeKind::Function));
      let result = self.parameters(ctx);
      let scope = self.reg.scopes.pop();
      result?;
      ctx.function = scope;
      return Ok(left);
    }

    if ctx.ty.is_some_and(|ty| self.reg.types.is_tuple(ty)) {
      return Err(Diagnostic::error(
        self.current_pos(),
        "typelist allowed only for functions",
      ));
    }
    Ok(left)
  }

  fn parameters(&mut self, ctx: &mut Frame) -> PResult<()> {
    if !self.current_is(")") {
      let mut params = ctx.parameter();
      let result = self.comma(&mut params);
      ctx.absorb(&params);
      result?;
    }
    self.expect(")")
  }

  /// Type suffixes of a declarator, then its name and dimensions.
  fn reference(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    while let Some(token) = self.peek_token() {
      let Some(via) = Indirection::from_symbol(&token.text) else {
        break;
      };
      self.pos += 1;

      let Some(base) = ctx.ty else {
        return Err(Diagnostic::error(
          &token.pos,
          format!("unexpected token when type expected: '{}'", token.text),
        ));
      };
      if !self.reg.types.can_indirect(base, via) {
        return Err(Diagnostic::error(
          &token.pos,
          format!("invalid type: '{}{}'", self.type_name(base), via.symbol()),
        ));
      }
      ctx.ty = Some(self.reg.types.indirect(base, via));
    }

    if ctx.typeonly {
      return match ctx.ty {
        Some(ty) => {
          let pos = ctx
            .type_pos
            .clone()
            .unwrap_or_else(|| self.current_pos().clone());
          Ok(Expr::new(ExprKind::Type, ty, pos))
        }
        None => Err(self.unexpected("type")),
      };
    }
    self.square(ctx)
  }

  // Expressions

  fn additive(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    let mut left = self.multiplicative(ctx)?;
    while let Some(op) = self.binary_operator(&["+", "-"]) {
      self.pos += 1;
      let right = self.multiplicative(ctx)?;
      let binary = if op.is("+") {
        BinaryOp::Add
      } else {
        BinaryOp::Sub
      };
      left = self.binary(binary, op, left, right)?;
    }
    Ok(left)
  }

  fn multiplicative(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    let mut left = self.unary(ctx)?;
    while let Some(op) = self.binary_operator(&["*", "/", "%"]) {
      self.pos += 1;
      let right = self.unary(ctx)?;
      let binary = match op.text.as_str() {
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        _ => BinaryOp::Mod,
      };
      left = self.binary(binary, op, left, right)?;
    }
    Ok(left)
  }

  fn binary_operator(&self, ops: &[&str]) -> Option<&'a Token> {
    self
      .peek_token()
      .filter(|t| t.is_operator() && ops.contains(&t.text.as_str()))
  }

  fn binary(&mut self, op: BinaryOp, at: &Token, left: Expr, right: Expr) -> PResult<Expr> {
    let types = &self.reg.types;
    let (mut left, mut right) = (left, right);

    let ty = match op {
      BinaryOp::Add | BinaryOp::Sub if types.is_pointer(left.ty) => {
        if types.is_pointer(right.ty) {
          if op == BinaryOp::Add || types.pointee(left.ty) != types.pointee(right.ty) {
            return Err(Diagnostic::error(
              &at.pos,
              format!(
                "invalid operands of type '{}' and '{}' to binary operator '{}'",
                types.name(left.ty),
                types.name(right.ty),
                at.text
              ),
            ));
          }
          TypeId::int(256)
        } else {
          self.check_number(&right, at, Side::Right, Arity::Binary)?;
          right = self.scale(right, left.ty);
          left.ty
        }
      }
      BinaryOp::Add | BinaryOp::Sub => {
        self.check_number(&left, at, Side::Left, Arity::Binary)?;
        if types.is_pointer(right.ty) {
          if op == BinaryOp::Sub {
            self.check_number(&right, at, Side::Right, Arity::Binary)?;
          }
          left = self.scale(left, right.ty);
          right.ty
        } else {
          self.check_number(&right, at, Side::Right, Arity::Binary)?;
          types.merge_integers(left.ty, right.ty)
        }
      }
      _ => {
        self.check_number(&left, at, Side::Left, Arity::Binary)?;
        self.check_number(&right, at, Side::Right, Arity::Binary)?;
        types.merge_integers(left.ty, right.ty)
      }
    };

    if let (Some(lhs), Some(rhs)) = (left.value(), right.value()) {
      let value = op.fold(lhs, rhs).ok_or_else(|| {
        Diagnostic::error(&at.pos, "division by zero in constant expression")
      })?;
      return Ok(Expr::literal(value, ty, left.pos));
    }

    let pos = left.pos.clone();
    Ok(Expr::new(
      ExprKind::Binary {
        op,
        lhs: Box::new(left),
        rhs: Box::new(right),
      },
      ty,
      pos,
    ))
  }

  /// Multiply an index by the word size of what `pointer` points to.
  fn scale(&self, expr: Expr, pointer: TypeId) -> Expr {
    let types = &self.reg.types;
    let size = types
      .pointee(pointer)
      .map(|t| types.word_size(t))
      .unwrap_or(32);

    match expr.kind {
      ExprKind::Literal(value) => Expr::literal(value * size, expr.ty, expr.pos),
      _ => {
        let (ty, pos) = (expr.ty, expr.pos.clone());
        let factor = Expr::literal(BigInt::from(size), TypeId::uint(8), pos.clone());
        Expr::new(
          ExprKind::Binary {
            op: BinaryOp::Mul,
            lhs: Box::new(expr),
            rhs: Box::new(factor),
          },
          ty,
          pos,
        )
      }
    }
  }

  fn check_number(&self, expr: &Expr, at: &Token, side: Side, arity: Arity) -> PResult<()> {
    if self.reg.types.is_integer(expr.ty) && !expr.is_type() {
      return Ok(());
    }
    let side = match side {
      Side::Left => "left",
      Side::Right => "right",
    };
    let arity = match arity {
      Arity::Unary => "unary",
      Arity::Binary => "binary",
    };
    Err(Diagnostic::error(
      &at.pos,
      format!(
        "invalid {side} operand of type '{}' to {arity} operator '{}'",
        self.type_name(expr.ty),
        at.text
      ),
    ))
  }

  /// Prefix operators, loosest first: reference, sign, increment.
  fn unary(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    let Some(op) = self.peek_token().filter(|t| t.is_operator()) else {
      return self.square(ctx);
    };

    match op.text.as_str() {
      "&" => {
        self.pos += 1;
        let operand = self.unary(ctx)?;
        if !operand.lvalue {
          return Err(Diagnostic::error(
            &op.pos,
            "right operand of operator '&' must be an lvalue",
          ));
        }
        let ty = self.reg.types.indirect(operand.ty, Indirection::Pointer);
        if let ExprKind::Var {
          memory_offset: Some(offset),
          ..
        } = operand.kind
        {
          return Ok(Expr::literal(BigInt::from(offset), ty, op.pos.clone()));
        }
        Ok(Expr::new(
          ExprKind::AddressOf(Box::new(operand)),
          ty,
          op.pos.clone(),
        ))
      }
      "*" => {
        self.pos += 1;
        let operand = self.unary(ctx)?;
        let Some(pointee) = self.reg.types.pointee(operand.ty) else {
          return Err(Diagnostic::error(
            &op.pos,
            format!(
              "invalid right operand of type '{}' to unary operator '*'",
              self.type_name(operand.ty)
            ),
          ));
        };
        let mut expr = Expr::new(ExprKind::Deref(Box::new(operand)), pointee, op.pos.clone());
        expr.lvalue = true;
        Ok(expr)
      }
      "@" | "$" => Err(Diagnostic::error(
        &op.pos,
        format!("operator not yet implemented: '{}'", op.text),
      )),
      "+" | "-" => {
        self.pos += 1;
        let operand = self.unary(ctx)?;
        if op.is("+") && self.reg.types.is_pointer(operand.ty) {
          return Ok(operand);
        }
        self.check_number(&operand, op, Side::Right, Arity::Unary)?;
        if op.is("+") {
          return Ok(Expr { lvalue: false, ..operand });
        }
        let ty = TypeId::int(self.reg.types.size(operand.ty) * 8);
        if let Some(value) = operand.value() {
          return Ok(Expr::literal(-value, ty, op.pos.clone()));
        }
        Ok(Expr::new(
          ExprKind::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(operand),
          },
          ty,
          op.pos.clone(),
        ))
      }
      "++" | "--" => {
        self.pos += 1;
        let operand = self.unary(ctx)?;
        if !operand.lvalue {
          return Err(Diagnostic::error(
            &op.pos,
            format!("right operand of operator '{}' must be an lvalue", op.text),
          ));
        }
        self.step(op, operand, true)
      }
      _ => self.square(ctx),
    }
  }

  fn step(&self, op: &Token, target: Expr, prefix: bool) -> PResult<Expr> {
    let types = &self.reg.types;
    let amount = match types.pointee(target.ty) {
      Some(pointee) if types.is_pointer(target.ty) => types.word_size(pointee),
      _ => {
        let side = if prefix { Side::Right } else { Side::Left };
        self.check_number(&target, op, side, Arity::Unary)?;
        1
      }
    };
    let step = if op.is("++") {
      StepOp::Increment
    } else {
      StepOp::Decrement
    };
    let (ty, pos) = (target.ty, target.pos.clone());
    Ok(Expr::new(
      ExprKind::Step {
        op: step,
        prefix,
        amount,
        target: Box::new(target),
      },
      ty,
      if prefix { op.pos.clone() } else { pos },
    ))
  }

  /// Subscripts; in declarations these are the array dimensions.
  fn square(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    let mut left = self.round(ctx)?;

    while self.current_is("[") && self.peek().is_some() {
      let open = self.current_pos();
      self.pos += 1;
      let next_pos = self.current_pos().clone();

      let mut sub = ctx.child();
      let right = if matches!(self.peek(), Some(Item::Type { .. })) {
        sub.typeonly = true;
        sub.set_declaration();
        sub.add_end("]");
        self.declaration(&mut sub)
      } else {
        sub.declaration = false;
        self.additive(&mut sub)
      };
      ctx.absorb(&sub);
      let right = right?;

      if ctx.declaration {
        let dim = self.dimension(ctx, right, next_pos)?;
        ctx.dims.push(dim);
      } else {
        if right.is_type() {
          return Err(Diagnostic::error(
            &next_pos,
            format!(
              "unexpected type when expression expected: '{}'",
              self.type_name(right.ty)
            ),
          ));
        }
        let Some(elem) = self.reg.types.pointee(left.ty).filter(|_| {
          self.reg.types.is_pointer(left.ty)
        }) else {
          return Err(Diagnostic::error(
            open,
            "subscripted value is not an array or pointer",
          ));
        };
        let index_op = Token::new(TokenKind::Operator, "[]", open.clone());
        self.check_number(&right, &index_op, Side::Right, Arity::Binary)?;
        let pos = left.pos.clone();
        let mut expr = Expr::new(
          ExprKind::Index {
            base: Box::new(left),
            index: Box::new(right),
          },
          elem,
          pos,
        );
        expr.lvalue = true;
        left = expr;
      }

      self.expect("]")?;
    }

    if !ctx.declaration {
      left = self.postfix(left)?;
    }
    Ok(left)
  }

  fn dimension(&self, ctx: &Frame, right: Expr, pos: Position) -> PResult<Dim> {
    if right.is_type() {
      return Ok(Dim::Type { ty: right.ty, pos });
    }
    let Some(value) = right.value() else {
      let message = if ctx.contract {
        "contract arrays can't have dynamic dimensions"
      } else if ctx.attr.is_some() {
        "attribute arrays can't have dynamic dimensions"
      } else {
        "arrays can't have dynamic dimensions"
      };
      return Err(Diagnostic::error(&right.pos, message));
    };
    if !self.reg.types.is_unsigned(right.ty) {
      return Err(Diagnostic::error(&pos, "array dimension must be of type uintN"));
    }
    if value.to_usize().is_none() {
      return Err(Diagnostic::error(&pos, "array dimension too large"));
    }
    Ok(Dim::Count {
      value: value.clone(),
      pos,
    })
  }

  fn postfix(&mut self, mut left: Expr) -> PResult<Expr> {
    while let Some(op) = self
      .peek_token()
      .filter(|t| t.is("++") || t.is("--"))
    {
      self.pos += 1;
      if !left.lvalue {
        return Err(Diagnostic::error(
          &op.pos,
          format!("left operand of operator '{}' is not an lvalue", op.text),
        ));
      }
      left = self.step(op, left, false)?;
    }
    Ok(left)
  }

  /// Parenthesized expression, or a type list.
  fn round(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    if !(self.current_is("(") && self.peek().is_some()) {
      return self.literal(ctx);
    }
    let open = self.current_pos().clone();

    let mut sub = ctx.child();
    sub.add_end(")");
    if self.next_is_type() {
      sub.typeonly = true;
      sub.set_declaration();
    }
    self.pos += 1;
    let inner = self.comma(&mut sub);
    ctx.absorb(&sub);
    let inner = inner?;
    self.expect(")")?;

    let Some(members) = inner.types() else {
      return Ok(inner);
    };
    let ty = match members.as_slice() {
      [single] => *single,
      _ => self.reg.types.tuple(members),
    };
    if !ctx.declaration && !ctx.typeonly {
      return Err(Diagnostic::error(
        &open,
        format!(
          "unexpected type when expression expected: '{}'",
          self.type_name(ty)
        ),
      ));
    }
    ctx.ty = Some(ty);
    ctx.type_pos = Some(open.clone());
    Ok(Expr::new(ExprKind::Type, ty, open))
  }

  /// Declared name, or an expression primary.
  fn literal(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    if ctx.declaration {
      return self.declared_name(ctx);
    }

    let Some(item) = self.peek() else {
      return Err(Diagnostic::error(&self.end.pos, "unexpected end of expression"));
    };
    self.pos += 1;

    let token = match item {
      Item::Type { ty, pos, .. } => {
        return Err(Diagnostic::error(
          pos,
          format!(
            "unexpected type when expression expected: '{}'",
            self.type_name(*ty)
          ),
        ));
      }
      Item::Token(token) => token,
    };

    match &token.kind {
      TokenKind::Number { hex, .. } => constant(hex, token, "number").map(|(value, bytes)| {
        Expr::literal(value, TypeId::uint(bytes * 8), token.pos.clone())
      }),
      TokenKind::Str { hex, len } => constant(hex, token, "string").map(|(value, _)| {
        Expr::literal(value, TypeId::bytes((*len).max(1)), token.pos.clone())
      }),
      TokenKind::Symbol => {
        if is_reserved(&token.text) {
          return Err(Diagnostic::error(
            &token.pos,
            format!("unexpected reserved token in expression: '{}'", token.text),
          ));
        }
        if let Some(var) = self.reg.scopes.lookup_variable(&token.text) {
          let mut expr = Expr::new(
            ExprKind::Var {
              name: var.name.clone(),
              memory_offset: var.memory_offset,
              storage_slot: var.storage_slot,
            },
            var.ty,
            token.pos.clone(),
          );
          expr.lvalue = var.lvalue;
          return Ok(expr);
        }
        if self.reg.scopes.has_function_named(&token.text) {
          return Err(Diagnostic::error(
            &token.pos,
            format!("function calls are not supported yet: '{}'", token.text),
          ));
        }
        Err(Diagnostic::error(
          &token.pos,
          format!("undefined symbol: '{}'", token.text),
        ))
      }
      _ => Err(Diagnostic::error(
        &token.pos,
        format!("unexpected token in expression: '{}'", token.text),
      )),
    }
  }

  fn declared_name(&mut self, ctx: &mut Frame) -> PResult<Expr> {
    let what = if ctx.ty.is_some() { "identifier" } else { "type" };

    let Some(item) = self.peek() else {
      if ctx.ty.is_some() && ctx.definition {
        return Ok(Expr::new(
          ExprKind::Empty,
          ctx.ty.unwrap_or(TypeId::VOID),
          self.end.pos.clone(),
        ));
      }
      if self.end.is_eof() {
        return Err(Diagnostic::error(
          &self.end.pos,
          format!("unexpected end of file when {what} expected"),
        ));
      }
      return Err(self.unexpected(what));
    };

    let token = match item {
      Item::Type { text, pos, .. } => {
        return Err(Diagnostic::error(
          pos,
          format!("unexpected type when identifier expected: '{text}'"),
        ));
      }
      Item::Token(token) => token,
    };
    if !token.is_symbol() {
      return Err(self.unexpected(what));
    }
    if is_reserved(&token.text) {
      return Err(Diagnostic::error(
        &token.pos,
        format!("unexpected reserved token when {what} expected: '{}'", token.text),
      ));
    }
    let Some(ty) = ctx.ty else {
      return Err(Diagnostic::error(
        &token.pos,
        format!("unknown type name: '{}'", token.text),
      ));
    };
    if self.reg.scopes.local_variable(&token.text).is_some() {
      let what = if ctx.attr.is_some() {
        "attribute"
      } else {
        "identifier"
      };
      return Err(Diagnostic::error(
        &token.pos,
        format!("redefined {what}: '{}'", token.text),
      ));
    }
    self.pos += 1;

    ctx.name = Some(token.clone());
    let mut expr = Expr::new(
      ExprKind::Declaration {
        name: token.text.clone(),
      },
      ty,
      token.pos.clone(),
    );
    expr.lvalue = true;
    Ok(expr)
  }
}

/// Value and byte width of a number or string constant.
fn constant(hex: &str, token: &Token, what: &str) -> PResult<(BigInt, usize)> {
  let bytes = crate::tokenizer::hex_byte_len(hex);
  if bytes > 32 {
    return Err(Diagnostic::error(
      &token.pos,
      format!("{what} exceeds 32 bytes word length: '{}'", token.text),
    ));
  }
  let value = parse_hex(hex).unwrap_or_default();
  Ok((value, bytes))
}
