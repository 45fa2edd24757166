//! Statement driver and symbol registry.
//!
//! The [`Compiler`] re-lexes the preprocessed lines, groups tokens into
//! statements, resolves type names and aggregate bodies while collecting,
//! and hands each statement to the parser. The parser calls back into the
//! [`Registry`] whenever a declarator is complete; the registry validates
//! it and stores it in the innermost scope.

use num_traits::ToPrimitive;

use crate::comments::CommentFilter;
use crate::context::{Dim, Frame, Modifier, is_reserved};
use crate::diagnostics::Diagnostics;
use crate::parser::{self, ExprKind, Item};
use crate::scope::{Contract, FUNCTION_MODIFIERS, Function, Scope, ScopeKind, ScopeStack, Variable};
use crate::source::{Position, SourceLine};
use crate::tokenizer::{Token, TokenKind};
use crate::ty::{AggregateKind, Dimension, TypeId, TypeTable};

/// Scopes, types and diagnostics of one compilation.
#[derive(Debug, Default)]
pub struct Registry {
  pub scopes: ScopeStack,
  pub types: TypeTable,
  pub diags: Diagnostics,
}

/// What compiling produced: the global scope (owning the contracts) and
/// the type arena its ids refer to.
#[derive(Debug, Clone)]
pub struct Program {
  pub scope: Scope,
  pub types: TypeTable,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  fn fail(&mut self, frame: &mut Frame, pos: &Position, message: impl Into<String>) {
    self.diags.error(pos, message);
    frame.failed = true;
  }

  /// Validate a variable declarator and store it in the innermost scope.
  pub fn add_variable(&mut self, frame: &mut Frame, at: &Position) {
    let Some(ty) = frame.ty else {
      return;
    };
    let Some(name) = frame.name.clone() else {
      if !frame.definition && self.types.aggregate(ty).is_none() {
        self.diags.warning(at, "empty variable declaration");
      }
      return;
    };
    let first = frame.first.clone().unwrap_or_else(|| name.pos.clone());

    if frame.global {
      return self.fail(frame, &first, "variables can't be declared in global scope");
    }
    if self.types.is_incomplete(ty) {
      let message = format!("not defined type: '{}'", self.types.name(ty));
      return self.fail(frame, at, message);
    }
    if let Some(pos) = frame.modifiers.position(Modifier::Export).cloned() {
      if !frame.contract {
        return self.fail(frame, &pos, "only contract variables can be exported");
      }
      if !frame.modifiers.has(Modifier::Storage) {
        return self.fail(frame, &pos, "only storage variables can be exported");
      }
    }
    if let Some(pos) = frame.modifiers.position(Modifier::Storage).cloned() {
      if !frame.contract {
        return self.fail(frame, &pos, "only contract variables can be storage");
      }
    }

    let storage = frame.modifiers.has(Modifier::Storage);
    for dim in frame.dims.clone() {
      match dim {
        Dim::Count { ref pos, .. } if storage => {
          self.fail(frame, pos, "only type dimensions allowed for storage arrays");
        }
        Dim::Type { ty, ref pos } if storage => {
          if self.types.is_indirect(ty) {
            self.fail(frame, pos, "pointers are not valid type dimensions for storage arrays");
          }
          if self
            .types
            .aggregate(ty)
            .is_some_and(|a| a.kind == AggregateKind::Struct)
          {
            self.fail(frame, pos, "structs are not valid type dimensions for storage arrays");
          }
        }
        Dim::Type { ref pos, .. } => {
          self.fail(frame, pos, "type dimensions allowed only for storage arrays");
        }
        Dim::Count { .. } => {}
      }
    }
    if frame.failed {
      return;
    }
    if ty == TypeId::VOID {
      return self.fail(frame, at, "variables can't be of type void");
    }
    if ty == TypeId::AUTO {
      return self.fail(frame, &name.pos, "type auto requires an initializer");
    }

    let Some(ty) = self.dimensioned(frame, ty) else {
      return;
    };
    let variable = Variable {
      name: name.text.clone(),
      ty,
      pos: name.pos.clone(),
      modifiers: frame.modifiers.clone(),
      lvalue: frame.dims.is_empty(),
      storage_slot: None,
      memory_offset: None,
      value: frame.value.clone(),
    };
    let listed = frame.param || frame.attr.is_some();
    if !self
      .scopes
      .top_mut()
      .add_variable(variable, &self.types, listed)
    {
      let message = format!("contract memory exhausted by '{}'", name.text);
      self.fail(frame, &name.pos, message);
    }
  }

  /// Array type for `base` with the frame's dimensions, outermost first.
  /// Fails the frame when the array wouldn't fit in memory.
  fn dimensioned(&mut self, frame: &mut Frame, base: TypeId) -> Option<TypeId> {
    let dims = frame.dims.clone();
    let mut ty = base;
    for dim in dims.iter().rev() {
      let (size, pos) = match dim {
        Dim::Count { value, pos } => (value.to_usize().map(Dimension::Count), pos),
        Dim::Type { ty, pos } => (Some(Dimension::Key(*ty)), pos),
      };
      match size.and_then(|size| self.types.array(ty, size)) {
        Some(array) => ty = array,
        None => {
          self.fail(frame, pos, "array dimension too large");
          return None;
        }
      }
    }
    Some(ty)
  }

  pub fn add_typedef(&mut self, frame: &mut Frame, _at: &Position) {
    let (Some(ty), Some(name)) = (frame.ty, frame.name.clone()) else {
      return;
    };
    if self.scopes.top().types.contains_key(&name.text) || crate::ty::primitive(&name.text).is_some()
    {
      let message = format!("redefined type: '{}'", name.text);
      return self.fail(frame, &name.pos, message);
    }
    let Some(ty) = self.dimensioned(frame, ty) else {
      return;
    };
    self.scopes.top_mut().types.insert(name.text, ty);
  }

  /// Register a function declarator; returns its signature.
  pub fn add_function(&mut self, frame: &mut Frame) -> Option<String> {
    let scope = frame.function.take()?;
    let name = frame.name.clone()?;
    let ret = frame.ty?;
    let first = frame.first.clone().unwrap_or_else(|| name.pos.clone());

    if frame.global {
      self.fail(
        frame,
        &first,
        "functions declaration and definition in global scope is not supported yet",
      );
      return None;
    }

    let mut modifiers: Vec<Modifier> = FUNCTION_MODIFIERS
      .into_iter()
      .filter(|m| frame.modifiers.has(*m))
      .collect();
    if (modifiers.contains(&Modifier::Pure) || modifiers.contains(&Modifier::View))
      && !modifiers.contains(&Modifier::Export)
    {
      modifiers.insert(0, Modifier::Export);
    }

    let (signature, mut extended) = self.sign(&name.text, ret, &scope, &modifiers);

    if let Some(prev) = self.scopes.lookup_function(&signature).cloned() {
      let line = prev.first.line;
      if !frame.defined {
        let message = format!("new declaration of '{extended}' previously declared at line {line}");
        self.fail(frame, &first, message);
        return None;
      }
      if prev.defined {
        let message = format!("new definition of '{extended}' previously defined at line {line}");
        self.fail(frame, &first, message);
        return None;
      }
      let mismatch = prev.ret != ret || modifiers.iter().any(|m| !prev.has(*m));
      if mismatch {
        let message = format!(
          "new declaration of '{extended}' previously declared as '{}' at line {line}",
          prev.extended
        );
        self.fail(frame, &first, message);
        return None;
      }
      modifiers = prev.modifiers;
      extended = prev.extended;
    }

    self.scopes.top_mut().add_function(Function {
      name: name.text,
      signature: signature.clone(),
      extended,
      ret,
      modifiers,
      defined: frame.defined,
      first,
      scope,
    });
    Some(signature)
  }

  /// Mangled signature and readable prototype.
  fn sign(&self, name: &str, ret: TypeId, scope: &Scope, modifiers: &[Modifier]) -> (String, String) {
    let mut signature = format!("F{}{name}", name.len());
    let mut params = Vec::new();
    for param in &scope.params {
      let Some(var) = scope.variables.get(param) else {
        continue;
      };
      let register = var.has(Modifier::Register);
      if register {
        signature.push('_');
      }
      signature.push_str(self.types.short(var.ty));
      params.push(format!(
        "{}{} {}",
        if register { "register " } else { "" },
        self.types.name(var.ty),
        var.name
      ));
    }

    let mut extended = format!("{} {name}({})", self.types.name(ret), params.join(", "));
    for modifier in modifiers {
      extended.push(' ');
      extended.push_str(modifier.keyword());
    }
    (signature, extended)
  }
}

/// Compile preprocessed lines into the global scope.
pub fn compile(lines: Vec<SourceLine>) -> (Program, Diagnostics) {
  let mut compiler = Compiler::new(lines);
  compiler.run();

  let Registry {
    scopes,
    types,
    diags,
  } = compiler.reg;
  let scope = scopes.into_root();
  log::debug!(
    "compiled {} contract(s), {} type(s)",
    scope.contracts.len(),
    types.count()
  );
  (Program { scope, types }, diags)
}

struct Compiler {
  filter: CommentFilter,
  reg: Registry,
}

impl Compiler {
  fn new(lines: Vec<SourceLine>) -> Self {
    Self {
      filter: CommentFilter::new(lines, false),
      reg: Registry::new(),
    }
  }

  /// Next token that is not blank.
  fn pull(&mut self) -> Token {
    loop {
      let token = self.filter.next_token(&mut self.reg.diags);
      if !token.is_space() {
        return token;
      }
    }
  }

  fn next(&mut self, pending: &mut Option<Token>) -> Token {
    match pending.take() {
      Some(token) => token,
      None => self.pull(),
    }
  }

  fn run(&mut self) {
    let mut pending = None;
    loop {
      let token = self.next(&mut pending);
      if token.is_eof() {
        return;
      }
      pending = self.statement(Frame::global(), token);
    }
  }

  /// Collect, parse and register one statement. Returns a token that was
  /// pulled but belongs to the enclosing construct.
  fn statement(&mut self, mut frame: Frame, first: Token) -> Option<Token> {
    let first = if first.is("typedef") {
      frame = frame.typedef();
      self.pull()
    } else {
      first
    };
    frame.first = Some(first.pos.clone());

    let (items, end) = self.collect(&mut frame, first);
    if items.is_empty() && end.is(";") && !frame.typedef {
      return None;
    }
    if !frame.failed {
      let expr = parser::parse(&items, &end, &mut frame, &mut self.reg);
      if let Some(expr) = expr.filter(|e| !matches!(e.kind, ExprKind::Empty)) {
        if !frame.failed {
          self.reg.scopes.top_mut().statements.push(expr);
        }
      }
    }

    if end.is(";") {
      return None;
    }
    if end.is("{") {
      if let Some(signature) = frame.body.take().filter(|_| !frame.failed) {
        return self.function_body(&signature);
      }
      if !frame.failed {
        self
          .reg
          .diags
          .error(&end.pos, "unexpected token when ';' expected: '{'");
      }
      return if opens_body(&items) {
        self.skip_block()
      } else {
        self.resync()
      };
    }
    if end.is("}") && !frame.failed {
      self
        .reg
        .diags
        .error(&end.pos, "unexpected token when ';' expected: '}'");
    }
    Some(end)
  }

  /// Gather the items of a statement up to one of the frame's end tokens.
  fn collect(&mut self, frame: &mut Frame, first: Token) -> (Vec<Item>, Token) {
    let mut items = Vec::new();
    let mut pending = Some(first);

    loop {
      let token = self.next(&mut pending);
      if frame.is_end(&token) && !token.is(",") {
        if token.is_eof() {
          self
            .reg
            .diags
            .error(&token.pos, "unexpected end of file when ';' expected");
          frame.failed = true;
        }
        return (items, token);
      }

      let aggregate = token
        .is_symbol()
        .then(|| AggregateKind::from_keyword(&token.text))
        .flatten();
      if let Some(kind) = aggregate {
        let (item, after) = self.aggregate(kind, frame, token);
        items.extend(item);
        pending = after;
        continue;
      }

      match token.kind {
        TokenKind::Symbol => match self.reg.scopes.lookup_type(&token.text) {
          Some(ty) => items.push(Item::Type {
            ty,
            text: token.text,
            pos: token.pos,
            definition: false,
          }),
          None => items.push(Item::Token(token)),
        },
        TokenKind::Number { .. } | TokenKind::Str { .. } | TokenKind::Operator => {
          items.push(Item::Token(token));
        }
        _ => {
          let message = format!("unexpected token in expression: '{}'", token.text);
          self.reg.fail(frame, &token.pos, message);
        }
      }
    }
  }

  /// `struct`, `packet`, `union` or `contract` after its keyword: a name,
  /// a body, or both.
  fn aggregate(
    &mut self,
    kind: AggregateKind,
    frame: &mut Frame,
    keyword: Token,
  ) -> (Option<Item>, Option<Token>) {
    let what = kind.keyword();
    let token = self.pull();

    if token.is_eof() {
      self.reg.fail(
        frame,
        &token.pos,
        "unexpected end of file when identifier or '{' expected",
      );
      return (None, Some(token));
    }

    if token.is("{") {
      let item = |ty| Item::Type {
        ty,
        text: what.to_string(),
        pos: keyword.pos.clone(),
        definition: true,
      };
      if kind == AggregateKind::Contract {
        let key = "contract default";
        let ty = match self.reg.scopes.lookup_type(key) {
          Some(_) => {
            self
              .reg
              .fail(frame, &token.pos, "redefined type: 'contract default'");
            self.reg.types.declare_aggregate(kind, "default")
          }
          None => self.declare(kind, "default"),
        };
        let after = self.contract_body(frame, ty, "default", &keyword.pos);
        return (Some(item(ty)), after);
      }
      let (ty, after) = self.aggregate_body(kind, frame, None);
      return (ty.map(item), after);
    }

    if !token.is_symbol() {
      let message = format!(
        "unexpected token when identifier or '{{' expected: '{}'",
        token.text
      );
      self.reg.fail(frame, &token.pos, message);
      return (None, Some(token));
    }
    if is_reserved(&token.text) {
      let message = format!(
        "unexpected reserved token when identifier or '{{' expected: '{}'",
        token.text
      );
      self.reg.fail(frame, &token.pos, message);
      return (None, None);
    }

    let tag = token.text;
    let key = format!("{what} {tag}");
    let existing = self.reg.scopes.lookup_type(&key);
    let next = self.pull();
    let item = |ty, definition| Item::Type {
      ty,
      text: key.clone(),
      pos: keyword.pos.clone(),
      definition,
    };

    if !next.is("{") {
      return match existing {
        Some(ty) => (Some(item(ty, false)), Some(next)),
        None => {
          let ty = self.declare(kind, &tag);
          (Some(item(ty, true)), Some(next))
        }
      };
    }

    let ty = match existing {
      Some(ty) if self.reg.types.is_incomplete(ty) => ty,
      Some(_) => {
        let message = format!("{what} already defined: '{tag}'");
        self.reg.fail(frame, &next.pos, message);
        self.reg.types.declare_aggregate(kind, &tag)
      }
      None => self.declare(kind, &tag),
    };
    let after = if kind == AggregateKind::Contract {
      self.contract_body(frame, ty, &tag, &keyword.pos)
    } else {
      self.aggregate_body(kind, frame, Some(ty)).1
    };
    (Some(item(ty, true)), after)
  }

  /// Incomplete named aggregate, registered in the innermost scope.
  fn declare(&mut self, kind: AggregateKind, tag: &str) -> TypeId {
    let ty = self.reg.types.declare_aggregate(kind, tag);
    self
      .reg
      .scopes
      .top_mut()
      .types
      .insert(format!("{} {tag}", kind.keyword()), ty);
    ty
  }

  /// Attributes of a struct, packet or union up to the closing `}`.
  fn aggregate_body(
    &mut self,
    kind: AggregateKind,
    frame: &mut Frame,
    placeholder: Option<TypeId>,
  ) -> (Option<TypeId>, Option<Token>) {
    self
      .reg
      .scopes
      .push(Scope::new(ScopeKind::Aggregate(kind)));

    let mut pending = None;
    let close = loop {
      let token = self.next(&mut pending);
      if token.is_eof() {
        self.reg.scopes.pop();
        self.reg.fail(
          frame,
          &token.pos,
          "unexpected end of file when type or '}' expected",
        );
        return (None, Some(token));
      }
      if token.is("}") {
        break token;
      }

      let mut attr = Frame::attribute(kind);
      attr.first = Some(token.pos.clone());
      let (items, end) = self.collect(&mut attr, token);
      if !attr.failed {
        parser::parse(&items, &end, &mut attr, &mut self.reg);
      }
      frame.absorb(&attr);

      if end.is("}") {
        self
          .reg
          .fail(frame, &end.pos, "unexpected token when ';' expected: '}'");
        pending = Some(end);
      } else if end.is_eof() {
        pending = Some(end);
      }
    };

    let scope = self
      .reg
      .scopes
      .pop()
      .unwrap_or_else(|| Scope::new(ScopeKind::Aggregate(kind)));
    let fields = scope.param_types();
    let empty = fields.is_empty();
    let Some(ty) = self.reg.types.define_aggregate(kind, placeholder, fields) else {
      let message = format!("{} size too large", kind.keyword());
      self.reg.fail(frame, &close.pos, message);
      return (None, None);
    };

    if empty {
      self
        .reg
        .diags
        .warning(&close.pos, format!("empty {} declaration", kind.keyword()));
    }
    if kind == AggregateKind::Packet && self.reg.types.size(ty) > 32 {
      self
        .reg
        .fail(frame, &close.pos, "packet size exceeds 32 bytes length");
    }
    (Some(ty), None)
  }

  /// Declarations of a contract up to the closing `}`.
  fn contract_body(
    &mut self,
    frame: &mut Frame,
    ty: TypeId,
    name: &str,
    pos: &Position,
  ) -> Option<Token> {
    self.reg.scopes.push(Scope::new(ScopeKind::Contract));

    let mut pending = None;
    let close = loop {
      let token = self.next(&mut pending);
      if token.is_eof() || token.is("}") {
        break token;
      }
      let mut statement = Frame::contract();
      statement.add_end("}");
      pending = self.statement(statement, token);
    };

    let scope = self
      .reg
      .scopes
      .pop()
      .unwrap_or_else(|| Scope::new(ScopeKind::Contract));
    self
      .reg
      .types
      .define_aggregate(AggregateKind::Contract, Some(ty), Vec::new());
    let contract = Contract {
      name: name.to_string(),
      ty,
      pos: pos.clone(),
      scope,
    };
    if !contract.has_exports() {
      self.reg.diags.warning(&close.pos, "empty contract declaration");
    }
    let contracts = &mut self.reg.scopes.top_mut().contracts;
    if !contracts.contains_key(name) {
      contracts.insert(name.to_string(), contract);
    }

    if close.is_eof() {
      self.reg.fail(
        frame,
        &close.pos,
        "unexpected end of file when declaration or '}' expected",
      );
      return Some(close);
    }
    None
  }

  /// Statements of a function body, in the scope holding its parameters.
  fn function_body(&mut self, signature: &str) -> Option<Token> {
    let scope = self
      .reg
      .scopes
      .top_mut()
      .functions
      .get_mut(signature)
      .map(|f| std::mem::replace(&mut f.scope, Scope::new(ScopeKind::Function)))
      .unwrap_or_else(|| Scope::new(ScopeKind::Function));

    self.reg.scopes.push(scope);
    let close = self.block();
    if let Some(scope) = self.reg.scopes.pop() {
      if let Some(function) = self.reg.scopes.top_mut().functions.get_mut(signature) {
        function.scope = scope;
      }
    }

    if close.is_eof() {
      self
        .reg
        .diags
        .error(&close.pos, "unexpected end of file when '}' expected");
      return Some(close);
    }
    None
  }

  /// Statements up to `}` (returned) or end of file.
  fn block(&mut self) -> Token {
    let mut pending = None;
    loop {
      let token = self.next(&mut pending);
      if token.is_eof() || token.is("}") {
        return token;
      }
      if token.is("{") {
        self.reg.scopes.push(Scope::new(ScopeKind::Block));
        let close = self.block();
        if let Some(inner) = self.reg.scopes.pop() {
          self.reg.scopes.top_mut().statements.extend(inner.statements);
        }
        if close.is_eof() {
          return close;
        }
        continue;
      }
      let mut statement = Frame::local();
      statement.add_end("}");
      pending = self.statement(statement, token);
    }
  }

  /// Skip a `{ ... }` whose opening brace was already consumed.
  /// Drop the rest of a statement that ran into a stray `{`: through the
  /// next `;`, or up to a `}` that closes the enclosing scope.
  fn resync(&mut self) -> Option<Token> {
    let mut depth = 0;
    loop {
      let token = self.pull();
      if token.is_eof() {
        return Some(token);
      }
      if token.is("{") {
        depth += 1;
      } else if token.is("}") {
        if depth == 0 {
          return Some(token);
        }
        depth -= 1;
      } else if token.is(";") && depth == 0 {
        return None;
      }
    }
  }

  fn skip_block(&mut self) -> Option<Token> {
    let mut depth = 1;
    loop {
      let token = self.pull();
      if token.is_eof() {
        self
          .reg
          .diags
          .error(&token.pos, "unexpected end of file when '}' expected");
        return Some(token);
      }
      if token.is("{") {
        depth += 1;
      } else if token.is("}") {
        depth -= 1;
        if depth == 0 {
          return None;
        }
      }
    }
  }
}

/// Whether the items before a `{` read like a function head, so the brace
/// opens a body rather than sitting inside an expression.
fn opens_body(items: &[Item]) -> bool {
  items
    .last()
    .is_some_and(|item| item.is(")") || Modifier::from_keyword(item.text()).is_some())
}

impl Program {
  /// Contract declared in the global scope.
  pub fn contract(&self, name: &str) -> Option<&Contract> {
    self.scope.contracts.get(name)
  }
}
