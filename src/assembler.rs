//! Label-resolving assembler for the EVM assembly mini-language.
//!
//! # Syntax
//!
//! ```text
//! .code                 # literals below get a PUSHn in front
//! start:                # label; a JUMPDEST in code
//! start                 # label reference, PUSHn <address> in code
//! runtime {             # nested block, defines runtime and runtime_length
//! .code
//! STOP
//! }
//! .data                 # literals and references are raw bytes
//! ```
//!
//! One statement per line. `#` and `//` start line comments, `/* */` spans
//! lines. A nested block is assembled on its own, with its own labels and
//! addresses starting at zero, and its bytes are inlined into the enclosing
//! stream.
//!
//! Label references are resolved by iterating layouts: every reference
//! starts one byte wide and is widened to the byte length of the address it
//! resolved to until no width changes. Widths only grow, so addresses only
//! grow, and the loop reaches a fixed point.

use std::collections::{HashMap, HashSet};

use crate::diagnostics::Diagnostics;
use crate::opcodes;
use crate::source::{Position, SourceLine};
use crate::tokenizer::{Lexer, Token, TokenKind, hex_byte_len};

/// Flattened opcode list and its bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
  pub opcodes: Vec<String>,
  pub bin: String,
}

#[derive(Debug, Clone)]
enum EntryKind {
  /// Mnemonic or `0x` immediate.
  Op(String),
  /// Label reference in code.
  Push(String),
  /// Label reference in data.
  Ref(String),
  Label { name: String, jumpdest: bool },
  Block { name: String, body: Block },
}

#[derive(Debug, Clone)]
struct Entry {
  kind: EntryKind,
  pos: Position,
}

#[derive(Debug, Clone)]
struct Label {
  line: usize,
  address: Option<usize>,
}

/// A resolved stream.
#[derive(Debug, Clone, Default)]
struct Block {
  ops: Vec<String>,
  length: usize,
}

/// Assemble `lines`. Any error leaves the result out.
pub fn assemble(lines: Vec<SourceLine>) -> (Option<Assembled>, Diagnostics) {
  let mut lexer = Lexer::new(lines);
  let mut diags = Diagnostics::new();
  let Some(block) = Stream::new(&mut lexer, &mut diags, false).run() else {
    return (None, diags);
  };

  match opcodes::encode(&block.ops) {
    Ok(bin) => {
      log::debug!("assembled {} bytes", block.length);
      let assembled = Assembled {
        opcodes: block.ops,
        bin,
      };
      (Some(assembled), diags)
    }
    Err(err) => {
      diags.push(err.to_diagnostic());
      (None, diags)
    }
  }
}

struct Stream<'a> {
  lexer: &'a mut Lexer,
  diags: &'a mut Diagnostics,
  nested: bool,
  code: bool,
  newline: bool,
  entries: Vec<Entry>,
  labels: HashMap<String, Label>,
}

impl<'a> Stream<'a> {
  fn new(lexer: &'a mut Lexer, diags: &'a mut Diagnostics, nested: bool) -> Self {
    Self {
      lexer,
      diags,
      nested,
      code: false,
      newline: true,
      entries: Vec::new(),
      labels: HashMap::new(),
    }
  }

  fn run(mut self) -> Option<Block> {
    let errors = self.diags.error_count();
    while self.pull() {}
    if self.diags.error_count() > errors || !self.check_references() {
      return None;
    }
    Some(self.resolve())
  }

  /// Handle one token; `false` once the stream is over.
  fn pull(&mut self) -> bool {
    let token = match self.lexer.next_token() {
      Ok(token) => token,
      Err(err) => {
        self.diags.push(err.into());
        return true;
      }
    };

    match token.kind {
      TokenKind::Eof => return false,
      TokenKind::Eol => {
        self.newline = true;
        return true;
      }
      TokenKind::Space => return true,
      TokenKind::LineComment => {
        self.lexer.skip_line();
        return true;
      }
      TokenKind::CommentOpen => return self.comment(),
      _ => {}
    }
    if token.is(":") {
      return self.colon(&token);
    }
    if token.is("{") {
      return self.block(&token);
    }
    if token.is("#") {
      self.lexer.skip_line();
      return true;
    }

    if !self.newline {
      return self.unexpected(&token);
    }
    self.newline = false;

    if token.is_symbol() {
      return self.symbol(token);
    }
    match &token.kind {
      TokenKind::Number { hex, decimal } => self.number(&token, hex, *decimal),
      TokenKind::Str { hex, len } => self.string(&token, hex, *len),
      _ if token.is(".") => self.section(),
      _ if token.is("}") => self.end(&token),
      _ => self.unexpected(&token),
    }
  }

  /// Report and give up on the rest of the line.
  fn error(&mut self, pos: &Position, message: impl Into<String>) -> bool {
    self.lexer.skip_line();
    self.diags.error(pos, message);
    true
  }

  fn unexpected(&mut self, token: &Token) -> bool {
    let message = format!("syntax error: unexpected token: '{}'", token.text);
    self.error(&token.pos, message)
  }

  fn comment(&mut self) -> bool {
    loop {
      self.lexer.comment_text(true);
      match self.lexer.next_token() {
        Ok(token) if token.kind == TokenKind::CommentClose => return true,
        Ok(token) if token.is_eof() => {
          return self.error(&token.pos, "unexpected end of file in multiline comment");
        }
        _ => {}
      }
    }
  }

  fn section(&mut self) -> bool {
    let token = match self.lexer.next_token() {
      Ok(token) => token,
      Err(err) => {
        self.diags.push(err.into());
        return true;
      }
    };
    match token.kind {
      TokenKind::Eol | TokenKind::Eof => self.error(&token.pos, "unexpected end of line after '.'"),
      TokenKind::Space => self.error(&token.pos, "unexpected white space after '.'"),
      TokenKind::Symbol if token.text == "code" => {
        self.code = true;
        true
      }
      TokenKind::Symbol if token.text == "data" => {
        self.code = false;
        true
      }
      _ => {
        let message = format!("unexpected token after '.': '{}'", token.text);
        self.error(&token.pos, message)
      }
    }
  }

  fn end(&mut self, token: &Token) -> bool {
    if !self.nested {
      return self.unexpected(token);
    }
    false
  }

  fn push_op(&mut self, op: String, pos: &Position) {
    self.entries.push(Entry {
      kind: EntryKind::Op(op),
      pos: pos.clone(),
    });
  }

  fn number(&mut self, token: &Token, hex: &str, decimal: bool) -> bool {
    let digits = hex[2..].to_ascii_uppercase();
    if self.code {
      if digits.len() > 64 {
        let kind = if decimal { "decimal" } else { "hex" };
        let message = format!("{kind} number exceeds 32 bytes word length: {}", token.text);
        return self.error(&token.pos, message);
      }
      self.push_op(opcodes::push(digits.len().div_ceil(2)), &token.pos);
    }
    self.push_op(format!("0x{digits}"), &token.pos);
    true
  }

  fn string(&mut self, token: &Token, hex: &str, len: usize) -> bool {
    let digits = hex[2..].to_ascii_uppercase();
    if self.code {
      if digits.len() > 64 {
        let message = format!("string exceeds 32 bytes word length: {}", token.text);
        return self.error(&token.pos, message);
      }
      let digits = if len == 0 { "0".to_string() } else { digits };
      self.push_op(opcodes::push(digits.len().div_ceil(2)), &token.pos);
      self.push_op(format!("0x{digits}"), &token.pos);
    } else if len > 0 {
      self.push_op(format!("0x{digits}"), &token.pos);
    }
    true
  }

  fn symbol(&mut self, token: Token) -> bool {
    let Token { text, pos, .. } = token;
    let kind = if opcodes::is_mnemonic(&text) {
      EntryKind::Op(text.to_ascii_uppercase())
    } else if self.code {
      EntryKind::Push(text)
    } else {
      EntryKind::Ref(text)
    };
    self.entries.push(Entry { kind, pos });
    true
  }

  /// The last entry, when it is a label reference that can become a
  /// definition.
  fn last_reference(&self) -> Option<(String, Position)> {
    let last = self.entries.last()?;
    match &last.kind {
      EntryKind::Push(name) | EntryKind::Ref(name) => Some((name.clone(), last.pos.clone())),
      _ => None,
    }
  }

  fn last_pos(&self, token: &Token) -> Position {
    self
      .entries
      .last()
      .map(|entry| entry.pos.clone())
      .unwrap_or_else(|| token.pos.clone())
  }

  fn redefined(&mut self, name: &str, pos: &Position) -> bool {
    let Some(line) = self.labels.get(name).map(|label| label.line) else {
      return false;
    };
    self.error(pos, format!("label already defined at line {line}: '{name}'"))
  }

  fn colon(&mut self, token: &Token) -> bool {
    if self.newline {
      return self.unexpected(token);
    }
    let Some((name, pos)) = self.last_reference() else {
      let pos = self.last_pos(token);
      return self.error(&pos, "a valid opcode can't be used as a label");
    };
    if self.redefined(&name, &pos) {
      return true;
    }

    self.labels.insert(
      name.clone(),
      Label {
        line: pos.line,
        address: None,
      },
    );
    let jumpdest = self.code;
    if let Some(last) = self.entries.last_mut() {
      last.kind = EntryKind::Label { name, jumpdest };
    }
    true
  }

  fn block(&mut self, token: &Token) -> bool {
    if self.newline {
      return self.unexpected(token);
    }
    let Some((name, pos)) = self.last_reference() else {
      let pos = self.last_pos(token);
      return self.error(&pos, "a valid opcode can't be used as a block name");
    };
    let length_name = format!("{name}_length");
    if self.redefined(&name, &pos) || self.redefined(&length_name, &pos) {
      return true;
    }

    self.labels.insert(
      name.clone(),
      Label {
        line: pos.line,
        address: None,
      },
    );
    let body = Stream::new(&mut *self.lexer, &mut *self.diags, true)
      .run()
      .unwrap_or_default();
    self.labels.insert(
      length_name,
      Label {
        line: pos.line,
        address: Some(body.length),
      },
    );
    if let Some(last) = self.entries.last_mut() {
      last.kind = EntryKind::Block { name, body };
    }
    true
  }

  /// Every referenced label must be defined; each missing one is reported
  /// at its first reference.
  fn check_references(&mut self) -> bool {
    let mut reported = HashSet::new();
    for entry in &self.entries {
      if let EntryKind::Push(name) | EntryKind::Ref(name) = &entry.kind {
        if !self.labels.contains_key(name) && reported.insert(name.clone()) {
          self
            .diags
            .error(&entry.pos, format!("unresolved label: '{name}'"));
        }
      }
    }
    reported.is_empty()
  }

  fn resolve(self) -> Block {
    let Stream {
      entries,
      mut labels,
      ..
    } = self;
    let mut widths = vec![1; entries.len()];

    let mut attempt = 1;
    let length = loop {
      let length = layout(&entries, &widths, &mut labels);
      let mut sure = true;
      for (entry, width) in entries.iter().zip(widths.iter_mut()) {
        if let EntryKind::Push(name) | EntryKind::Ref(name) = &entry.kind {
          let needed = byte_len(address(&labels, name));
          if needed > *width {
            *width = needed;
            sure = false;
          }
        }
      }
      log::trace!("assembler attempt {attempt}: {length} bytes");
      if sure {
        break length;
      }
      attempt += 1;
    };

    let mut ops = Vec::new();
    for (entry, width) in entries.into_iter().zip(widths) {
      match entry.kind {
        EntryKind::Op(op) => ops.push(op),
        EntryKind::Push(name) => {
          ops.push(opcodes::push(width));
          ops.push(format!("0x{:X}", address(&labels, &name)));
        }
        EntryKind::Ref(name) => ops.push(format!("0x{:X}", address(&labels, &name))),
        EntryKind::Label { jumpdest, .. } => {
          if jumpdest {
            ops.push("JUMPDEST".to_string());
          }
        }
        EntryKind::Block { body, .. } => ops.extend(body.ops),
      }
    }
    Block { ops, length }
  }
}

/// Assign every label its address under the current reference widths and
/// return the stream length.
fn layout(entries: &[Entry], widths: &[usize], labels: &mut HashMap<String, Label>) -> usize {
  let mut at = 0;
  for (entry, width) in entries.iter().zip(widths) {
    match &entry.kind {
      EntryKind::Op(op) if opcodes::is_mnemonic(op) => at += 1,
      EntryKind::Op(op) => at += hex_byte_len(op),
      EntryKind::Push(_) => at += 1 + width,
      EntryKind::Ref(_) => at += width,
      EntryKind::Label { name, jumpdest } => {
        place(labels, name, at);
        if *jumpdest {
          at += 1;
        }
      }
      EntryKind::Block { name, body } => {
        place(labels, name, at);
        at += body.length;
      }
    }
  }
  at
}

fn place(labels: &mut HashMap<String, Label>, name: &str, at: usize) {
  if let Some(label) = labels.get_mut(name) {
    label.address = Some(at);
  }
}

fn address(labels: &HashMap<String, Label>, name: &str) -> usize {
  labels
    .get(name)
    .and_then(|label| label.address)
    .unwrap_or_default()
}

/// Bytes needed to encode `value`, at least one.
fn byte_len(value: usize) -> usize {
  let bits = (usize::BITS - value.leading_zeros()) as usize;
  bits.div_ceil(8).max(1)
}
