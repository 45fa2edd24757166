//! Diagnostic sink shared by the pipeline stages.
//!
//! Every stage owns a private [`Diagnostics`] and hands it to its caller at
//! the end (see [`Diagnostics::merge`]). Entries keep source order; the
//! `errors`/`warnings` views are filters over the same list, which is the
//! `messages` superset.

use std::fmt;

use crate::source::Position;

/// Tool name that prefixes every rendered diagnostic.
pub const TOOL: &str = "ccc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Error,
  Warning,
  Fatal,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Severity::Error => write!(f, "error"),
      Severity::Warning => write!(f, "warning"),
      Severity::Fatal => write!(f, "fatal error"),
    }
  }
}

/// A single reported problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
  pub severity: Severity,
  pub position: Option<Position>,
  pub message: String,
}

impl Diagnostic {
  pub fn error(position: &Position, message: impl Into<String>) -> Self {
    Self {
      severity: Severity::Error,
      position: Some(position.clone()),
      message: message.into(),
    }
  }

  pub fn warning(position: &Position, message: impl Into<String>) -> Self {
    Self {
      severity: Severity::Warning,
      position: Some(position.clone()),
      message: message.into(),
    }
  }

  /// An error with no source position (option conflicts, unreadable input).
  pub fn unplaced(message: impl Into<String>) -> Self {
    Self {
      severity: Severity::Error,
      position: None,
      message: message.into(),
    }
  }

  pub fn fatal(message: impl Into<String>) -> Self {
    Self {
      severity: Severity::Fatal,
      position: None,
      message: message.into(),
    }
  }

  pub fn is_error(&self) -> bool {
    matches!(self.severity, Severity::Error | Severity::Fatal)
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.position {
      Some(pos) => write!(f, "{TOOL}:{}:{pos}:{}", self.severity, self.message),
      None => write!(f, "{TOOL}:{}:{}", self.severity, self.message),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
  entries: Vec<Diagnostic>,
}

impl Diagnostics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, diagnostic: Diagnostic) {
    self.entries.push(diagnostic);
  }

  pub fn error(&mut self, position: &Position, message: impl Into<String>) {
    self.push(Diagnostic::error(position, message));
  }

  pub fn warning(&mut self, position: &Position, message: impl Into<String>) {
    self.push(Diagnostic::warning(position, message));
  }

  /// Append another sink, keeping its order after ours.
  pub fn merge(&mut self, other: Diagnostics) {
    self.entries.extend(other.entries);
  }

  pub fn has_errors(&self) -> bool {
    self.entries.iter().any(Diagnostic::is_error)
  }

  pub fn error_count(&self) -> usize {
    self.errors().count()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
    self.entries.iter().filter(|d| d.is_error())
  }

  pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
    self
      .entries
      .iter()
      .filter(|d| d.severity == Severity::Warning)
  }

  pub fn messages(&self) -> &[Diagnostic] {
    &self.entries
  }

  /// Rendered `errors` list.
  pub fn error_lines(&self) -> Vec<String> {
    self.errors().map(ToString::to_string).collect()
  }

  /// Rendered `warnings` list.
  pub fn warning_lines(&self) -> Vec<String> {
    self.warnings().map(ToString::to_string).collect()
  }

  /// Rendered `messages` list.
  pub fn message_lines(&self) -> Vec<String> {
    self.entries.iter().map(ToString::to_string).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::rc::Rc;

  fn pos(line: usize, column: usize) -> Position {
    Position::new(Rc::from("src"), line, column)
  }

  #[test]
  fn renders_the_tool_prefixed_format() {
    assert_eq!(
      Diagnostic::error(&pos(3, 7), "variables can't be of type void").to_string(),
      "ccc:error:src:3:7:variables can't be of type void"
    );
    assert_eq!(
      Diagnostic::warning(&pos(1, 1), "repeated modifier: 'pure'").to_string(),
      "ccc:warning:src:1:1:repeated modifier: 'pure'"
    );
    assert_eq!(
      Diagnostic::fatal("no input file").to_string(),
      "ccc:fatal error:no input file"
    );
  }

  #[test]
  fn messages_keep_source_order_across_merges() {
    let mut outer = Diagnostics::new();
    outer.warning(&pos(1, 1), "first");
    let mut inner = Diagnostics::new();
    inner.error(&pos(2, 1), "second");
    outer.merge(inner);
    outer.warning(&pos(3, 1), "third");

    assert_eq!(outer.len(), 3);
    assert_eq!(outer.error_count(), 1);
    assert_eq!(outer.warning_lines().len(), 2);
    assert_eq!(outer.message_lines()[1], "ccc:error:src:2:1:second");
    assert!(outer.has_errors());
  }
}
