//! Lexical scopes and the symbol records they hold.
//!
//! Scopes nest strictly, so the chain is a plain vector used as a stack:
//! entering a block pushes, leaving pops, and every lookup walks from the
//! innermost scope outwards. Contract and function scopes are not dropped
//! on exit; they are moved into the symbol that owns them so later stages
//! can lower them.

use indexmap::IndexMap;
use num_bigint::BigInt;

use crate::context::{Modifier, Modifiers};
use crate::parser::Expr;
use crate::source::Position;
use crate::ty::{AggregateKind, TypeId, TypeTable, primitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
  Global,
  Contract,
  Aggregate(AggregateKind),
  Function,
  Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
  pub name: String,
  pub ty: TypeId,
  pub pos: Position,
  pub modifiers: Modifiers,
  /// Arrays are not assignable as a whole.
  pub lvalue: bool,
  pub storage_slot: Option<usize>,
  pub memory_offset: Option<usize>,
  /// Constant initializer, when there is one.
  pub value: Option<BigInt>,
}

impl Variable {
  pub fn has(&self, modifier: Modifier) -> bool {
    self.modifiers.has(modifier)
  }
}

/// Modifiers that are part of a function's identity, in signature order.
pub const FUNCTION_MODIFIERS: [Modifier; 4] = [
  Modifier::Export,
  Modifier::Pure,
  Modifier::Stackless,
  Modifier::View,
];

#[derive(Debug, Clone)]
pub struct Function {
  pub name: String,
  /// Mangled key, e.g. `F1a_ri2`.
  pub signature: String,
  /// Readable prototype used in diagnostics.
  pub extended: String,
  pub ret: TypeId,
  pub modifiers: Vec<Modifier>,
  pub defined: bool,
  pub first: Position,
  /// Parameters, then the body's locals and statements.
  pub scope: Scope,
}

impl Function {
  pub fn has(&self, modifier: Modifier) -> bool {
    self.modifiers.contains(&modifier)
  }
}

#[derive(Debug, Clone)]
pub struct Contract {
  pub name: String,
  pub ty: TypeId,
  pub pos: Position,
  pub scope: Scope,
}

impl Contract {
  /// Exported functions and exported storage variables.
  pub fn has_exports(&self) -> bool {
    self.scope.functions.values().any(|f| f.has(Modifier::Export))
      || self.scope.variables.values().any(|v| v.has(Modifier::Export))
  }
}

#[derive(Debug, Clone)]
pub struct Scope {
  pub kind: ScopeKind,
  pub types: IndexMap<String, TypeId>,
  pub variables: IndexMap<String, Variable>,
  pub functions: IndexMap<String, Function>,
  pub contracts: IndexMap<String, Contract>,
  /// Next free storage slot.
  pub storage_slots: usize,
  /// Next free memory byte offset.
  pub memory_offset: usize,
  /// Parameters or attributes, in declaration order.
  pub params: Vec<String>,
  pub statements: Vec<Expr>,
}

impl Scope {
  pub fn new(kind: ScopeKind) -> Self {
    Self {
      kind,
      types: IndexMap::new(),
      variables: IndexMap::new(),
      functions: IndexMap::new(),
      contracts: IndexMap::new(),
      storage_slots: 0,
      memory_offset: 0,
      params: Vec::new(),
      statements: Vec::new(),
    }
  }

  /// Store a variable, assigning its storage slot or memory offset when it
  /// belongs to a contract. `listed` variables are parameters/attributes.
  /// Returns `false`, storing nothing, when contract memory would overflow.
  pub fn add_variable(&mut self, mut var: Variable, types: &TypeTable, listed: bool) -> bool {
    if self.kind == ScopeKind::Contract {
      if var.has(Modifier::Storage) {
        var.storage_slot = Some(self.storage_slots);
        self.storage_slots += 1;
      } else {
        let Some(end) = self.memory_offset.checked_add(types.word_size(var.ty)) else {
          return false;
        };
        var.memory_offset = Some(self.memory_offset);
        self.memory_offset = end;
      }
    }
    if listed {
      self.params.push(var.name.clone());
    }
    self.variables.insert(var.name.clone(), var);
    true
  }

  pub fn add_function(&mut self, function: Function) {
    self.functions.insert(function.signature.clone(), function);
  }

  /// Parameters (or attributes) with their types, in order.
  pub fn param_types(&self) -> Vec<(String, TypeId)> {
    self
      .params
      .iter()
      .filter_map(|name| self.variables.get(name).map(|v| (name.clone(), v.ty)))
      .collect()
  }
}

/// The chain of open scopes, innermost last.
#[derive(Debug, Clone)]
pub struct ScopeStack {
  frames: Vec<Scope>,
}

impl Default for ScopeStack {
  fn default() -> Self {
    Self::new()
  }
}

impl ScopeStack {
  pub fn new() -> Self {
    Self {
      frames: vec![Scope::new(ScopeKind::Global)],
    }
  }

  pub fn push(&mut self, scope: Scope) {
    self.frames.push(scope);
  }

  /// Close the innermost scope. The global scope is never popped.
  pub fn pop(&mut self) -> Option<Scope> {
    if self.frames.len() > 1 {
      self.frames.pop()
    } else {
      None
    }
  }

  pub fn top(&self) -> &Scope {
    &self.frames[self.frames.len() - 1]
  }

  pub fn top_mut(&mut self) -> &mut Scope {
    let last = self.frames.len() - 1;
    &mut self.frames[last]
  }

  pub fn lookup_type(&self, name: &str) -> Option<TypeId> {
    primitive(name).or_else(|| {
      self
        .frames
        .iter()
        .rev()
        .find_map(|s| s.types.get(name).copied())
    })
  }

  pub fn lookup_variable(&self, name: &str) -> Option<&Variable> {
    self.frames.iter().rev().find_map(|s| s.variables.get(name))
  }

  /// Variable declared in the innermost scope only.
  pub fn local_variable(&self, name: &str) -> Option<&Variable> {
    self.top().variables.get(name)
  }

  pub fn lookup_function(&self, signature: &str) -> Option<&Function> {
    self.frames.iter().rev().find_map(|s| s.functions.get(signature))
  }

  pub fn has_function_named(&self, name: &str) -> bool {
    self
      .frames
      .iter()
      .any(|s| s.functions.values().any(|f| f.name == name))
  }

  /// Hand back the global scope once compilation is over.
  pub fn into_root(mut self) -> Scope {
    self.frames.truncate(1);
    self
      .frames
      .pop()
      .unwrap_or_else(|| Scope::new(ScopeKind::Global))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::rc::Rc;

  fn var(name: &str, ty: TypeId, storage: bool) -> Variable {
    let pos = Position::new(Rc::from("src"), 1, 1);
    let mut modifiers = Modifiers::default();
    if storage {
      modifiers.set(Modifier::Storage, pos.clone());
    }
    Variable {
      name: name.into(),
      ty,
      pos,
      modifiers,
      lvalue: true,
      storage_slot: None,
      memory_offset: None,
      value: None,
    }
  }

  #[test]
  fn contract_scope_assigns_slots_and_offsets() {
    let mut types = TypeTable::new();
    let array = types.array(TypeId::int(8), crate::ty::Dimension::Count(3)).unwrap();
    let mut scope = Scope::new(ScopeKind::Contract);
    scope.add_variable(var("a", TypeId::int(8), false), &types, false);
    scope.add_variable(var("s", TypeId::uint(256), true), &types, false);
    scope.add_variable(var("b", array, false), &types, false);
    scope.add_variable(var("c", TypeId::ADDRESS, false), &types, false);
    scope.add_variable(var("t", TypeId::int(8), true), &types, false);

    let offsets: Vec<_> = scope.variables.values().map(|v| v.memory_offset).collect();
    assert_eq!(offsets, vec![Some(0), None, Some(32), Some(128), None]);
    assert_eq!(scope.variables["s"].storage_slot, Some(0));
    assert_eq!(scope.variables["t"].storage_slot, Some(1));
  }

  #[test]
  fn lookups_walk_outwards_and_shadow() {
    let types = TypeTable::new();
    let mut stack = ScopeStack::new();
    stack
      .top_mut()
      .add_variable(var("x", TypeId::int(8), false), &types, false);
    stack.push(Scope::new(ScopeKind::Block));
    assert!(stack.lookup_variable("x").is_some());
    assert!(stack.local_variable("x").is_none());
    stack
      .top_mut()
      .add_variable(var("x", TypeId::uint(8), false), &types, false);
    assert_eq!(stack.lookup_variable("x").map(|v| v.ty), Some(TypeId::uint(8)));
    assert!(stack.pop().is_some());
    assert_eq!(stack.lookup_variable("x").map(|v| v.ty), Some(TypeId::int(8)));
    assert!(stack.pop().is_none());
    assert_eq!(stack.lookup_type("int16"), Some(TypeId::int(16)));
  }
}
