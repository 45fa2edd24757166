//! Declaration frames and the static modifier and reserved-word tables.
//!
//! A [`Frame`] is the parse state of one declaration or expression: which
//! tokens end it, which modifiers and flags are active, and what has been
//! resolved so far (type, name, dimensions, initializer). Sub-parses get a
//! [`Frame::child`], a copy they are free to change; the parent learns about
//! a failed child through [`Frame::absorb`].

use std::collections::HashSet;

use num_bigint::BigInt;
use once_cell::sync::Lazy;

use crate::scope::Scope;
use crate::source::Position;
use crate::tokenizer::Token;
use crate::ty::{AggregateKind, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
  Export,
  Memory,
  Pure,
  Register,
  Stackless,
  Storage,
  View,
}

impl Modifier {
  pub const ALL: [Modifier; 7] = [
    Modifier::Export,
    Modifier::Memory,
    Modifier::Pure,
    Modifier::Register,
    Modifier::Stackless,
    Modifier::Storage,
    Modifier::View,
  ];

  pub fn from_keyword(text: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|m| m.keyword() == text)
  }

  pub fn keyword(self) -> &'static str {
    match self {
      Modifier::Export => "export",
      Modifier::Memory => "memory",
      Modifier::Pure => "pure",
      Modifier::Register => "register",
      Modifier::Stackless => "stackless",
      Modifier::Storage => "storage",
      Modifier::View => "view",
    }
  }

  /// Modifiers that can't be combined with this one.
  pub fn conflicts(self) -> &'static [Modifier] {
    use Modifier::*;
    match self {
      Export => &[Memory, Register, Stackless],
      Memory => &[Export, Pure, Register, Stackless, Storage, View],
      Pure => &[Memory, Register, Stackless, Storage, View],
      Register => &[Export, Memory, Pure, Stackless, Storage, View],
      Stackless => &[Export, Memory, Pure, Register, Storage, View],
      Storage => &[Memory, Pure, Register, Stackless],
      View => &[Memory, Pure, Register, Stackless],
    }
  }

  fn slot(self) -> usize {
    self as usize
  }
}

static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
  let words = [
    "break", "case", "class", "continue", "contract", "do", "else", "for", "if", "map", "pack",
    "packet", "return", "sizeof", "struct", "switch", "typedef", "union", "unpack", "while",
  ];
  words
    .into_iter()
    .chain(Modifier::ALL.iter().map(|m| m.keyword()))
    .collect()
});

pub fn is_reserved(word: &str) -> bool {
  RESERVED.contains(word)
}

/// Active modifiers, each remembering where it was written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifiers {
  slots: [Option<Position>; 7],
}

impl Modifiers {
  pub fn has(&self, modifier: Modifier) -> bool {
    self.slots[modifier.slot()].is_some()
  }

  pub fn position(&self, modifier: Modifier) -> Option<&Position> {
    self.slots[modifier.slot()].as_ref()
  }

  pub fn set(&mut self, modifier: Modifier, pos: Position) {
    self.slots[modifier.slot()] = Some(pos);
  }

  /// First active modifier that conflicts with `modifier`.
  pub fn conflict(&self, modifier: Modifier) -> Option<Modifier> {
    modifier.conflicts().iter().copied().find(|m| self.has(*m))
  }

  pub fn iter(&self) -> impl Iterator<Item = Modifier> + '_ {
    Modifier::ALL.into_iter().filter(|m| self.has(*m))
  }

  pub fn clear(&mut self) {
    self.slots = Default::default();
  }
}

/// One array dimension as written in a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
  Count { value: BigInt, pos: Position },
  Type { ty: TypeId, pos: Position },
}

impl Dim {
  pub fn pos(&self) -> &Position {
    match self {
      Dim::Count { pos, .. } | Dim::Type { pos, .. } => pos,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Frame {
  pub ends: Vec<&'static str>,
  pub modifiers: Modifiers,
  pub global: bool,
  pub contract: bool,
  pub declaration: bool,
  pub typedef: bool,
  pub typeonly: bool,
  pub param: bool,
  /// Attribute of the aggregate body being parsed.
  pub attr: Option<AggregateKind>,
  /// Function body follows.
  pub defined: bool,
  /// The type item just consumed was an aggregate definition.
  pub definition: bool,
  pub dims: Vec<Dim>,
  pub ty: Option<TypeId>,
  pub type_pos: Option<Position>,
  pub name: Option<Token>,
  pub value: Option<BigInt>,
  /// Statement's first token.
  pub first: Option<Position>,
  /// Parameter scope of a function declarator.
  pub function: Option<Scope>,
  /// Signature of the function whose body follows the statement.
  pub body: Option<String>,
  pub failed: bool,
}

impl Default for Frame {
  fn default() -> Self {
    Self::new()
  }
}

impl Frame {
  pub fn new() -> Self {
    Self {
      ends: vec![";"],
      modifiers: Modifiers::default(),
      global: false,
      contract: false,
      declaration: false,
      typedef: false,
      typeonly: false,
      param: false,
      attr: None,
      defined: false,
      definition: false,
      dims: Vec::new(),
      ty: None,
      type_pos: None,
      name: None,
      value: None,
      first: None,
      function: None,
      body: None,
      failed: false,
    }
  }

  pub fn global() -> Self {
    let mut frame = Self::new();
    frame.add_end("{");
    frame.global = true;
    frame
  }

  pub fn contract() -> Self {
    let mut frame = Self::global();
    frame.global = false;
    frame.contract = true;
    frame
  }

  /// Statement inside a function body.
  pub fn local() -> Self {
    let mut frame = Self::new();
    frame.add_end("{");
    frame
  }

  pub fn attribute(kind: AggregateKind) -> Self {
    let mut frame = Self::new();
    frame.add_end("}");
    frame.set_declaration();
    frame.remove_end(",");
    frame.attr = Some(kind);
    frame
  }

  pub fn typedef(mut self) -> Self {
    self.set_declaration();
    self.remove_end("{");
    self.typedef = true;
    self
  }

  /// Frame for the parameter list of a function declarator.
  pub fn parameter(&self) -> Self {
    let mut frame = self.child();
    frame.set_declaration();
    frame.remove_end(";");
    frame.remove_end("{");
    frame.add_end(")");
    frame.param = true;
    frame.global = false;
    frame.contract = false;
    frame.defined = false;
    frame.ty = None;
    frame.dims.clear();
    frame.modifiers.clear();
    frame
  }

  /// Copy for a sub-parse. Per-declarator state is not inherited.
  pub fn child(&self) -> Self {
    let mut frame = self.clone();
    frame.name = None;
    frame.value = None;
    frame.function = None;
    frame.body = None;
    frame.failed = false;
    frame
  }

  /// Take over the outcome of a child frame.
  pub fn absorb(&mut self, child: &Frame) {
    if child.failed {
      self.failed = true;
    }
  }

  pub fn set_declaration(&mut self) {
    self.add_end(",");
    self.declaration = true;
  }

  pub fn add_end(&mut self, end: &'static str) {
    if !self.ends.contains(&end) {
      self.ends.push(end);
    }
  }

  pub fn remove_end(&mut self, end: &str) {
    self.ends.retain(|e| *e != end);
  }

  pub fn is_end(&self, token: &Token) -> bool {
    token.is_eof() || self.ends.iter().any(|e| token.is(e))
  }

  /// What the end check expects, for error messages.
  pub fn expected(&self) -> &'static str {
    if self.param {
      "',' or ')'"
    } else if self.attr.is_some() {
      "';'"
    } else {
      "',' or ';'"
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::rc::Rc;

  fn pos() -> Position {
    Position::new(Rc::from("src"), 1, 1)
  }

  #[test]
  fn conflict_table_is_symmetric_where_it_matters() {
    let mut modifiers = Modifiers::default();
    modifiers.set(Modifier::Storage, pos());
    assert_eq!(modifiers.conflict(Modifier::Memory), Some(Modifier::Storage));
    assert_eq!(modifiers.conflict(Modifier::Export), None);
    modifiers.set(Modifier::Export, pos());
    assert_eq!(modifiers.conflict(Modifier::Register), Some(Modifier::Export));
    assert_eq!(
      modifiers.iter().collect::<Vec<_>>(),
      vec![Modifier::Export, Modifier::Storage]
    );
  }

  #[test]
  fn modifiers_and_keywords_are_reserved() {
    assert!(is_reserved("stackless"));
    assert!(is_reserved("while"));
    assert!(!is_reserved("uint8"));
    assert_eq!(Modifier::from_keyword("view"), Some(Modifier::View));
  }

  #[test]
  fn parameter_frames_end_at_parenthesis() {
    let mut outer = Frame::contract();
    outer.set_declaration();
    outer.modifiers.set(Modifier::Pure, pos());
    outer.ty = Some(TypeId::VOID);
    let params = outer.parameter();
    assert!(params.param && params.declaration);
    assert!(!params.modifiers.has(Modifier::Pure));
    assert!(params.ty.is_none());
    assert!(params.ends.contains(&")"));
    assert!(!params.ends.contains(&";"));
    assert_eq!(params.expected(), "',' or ')'");
  }

  #[test]
  fn child_failure_reaches_the_parent() {
    let mut parent = Frame::new();
    let mut child = parent.child();
    child.failed = true;
    parent.absorb(&child);
    assert!(parent.failed);
  }
}
