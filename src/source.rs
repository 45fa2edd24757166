//! Source text plumbing shared by every stage.
//!
//! A program enters the pipeline as a list of [`SourceLine`]s. The
//! preprocessor emits a fresh list (macro-expanded, includes spliced in) and
//! the compiler re-lexes that list, so every stage addresses text the same
//! way: by line record and 1-based column.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// One physical line of input together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
  pub filename: Rc<str>,
  pub text: String,
  pub nr: usize,
}

impl SourceLine {
  pub fn new(filename: Rc<str>, text: impl Into<String>, nr: usize) -> Self {
    Self {
      filename,
      text: text.into(),
      nr,
    }
  }
}

/// Split a whole file into numbered lines. A trailing newline yields a final
/// empty line, which is where end-of-file gets reported.
pub fn split_lines(filename: &str, text: &str) -> Vec<SourceLine> {
  let filename: Rc<str> = Rc::from(filename);
  text
    .split('\n')
    .enumerate()
    .map(|(i, line)| SourceLine::new(filename.clone(), line, i + 1))
    .collect()
}

/// Join lines back into text the way `split_lines` cut them.
pub fn join_lines(lines: &[SourceLine]) -> String {
  lines
    .iter()
    .map(|line| line.text.as_str())
    .collect::<Vec<_>>()
    .join("\n")
}

/// File/line/column of a token or diagnostic. Columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
  pub filename: Rc<str>,
  pub line: usize,
  pub column: usize,
}

impl Position {
  pub fn new(filename: Rc<str>, line: usize, column: usize) -> Self {
    Self {
      filename,
      line,
      column,
    }
  }
}

impl fmt::Display for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.filename, self.line, self.column)
  }
}

/// Where source files come from. The main input and every `#include` are read
/// through this seam so tests can run without touching the disk.
pub trait SourceProvider {
  fn read(&self, path: &str) -> io::Result<String>;

  /// Path of `name` as seen from a file named `from`.
  fn resolve(&self, from: &str, name: &str) -> String {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
      return name.to_string();
    }
    match Path::new(from).parent() {
      Some(dir) if !dir.as_os_str().is_empty() => dir.join(candidate).to_string_lossy().into_owned(),
      _ => name.to_string(),
    }
  }
}

/// Reads from the real file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystem;

impl SourceProvider for FileSystem {
  fn read(&self, path: &str) -> io::Result<String> {
    std::fs::read_to_string(PathBuf::from(path))
  }
}

/// A fixed set of named sources, used by tests and embedders.
#[derive(Debug, Default, Clone)]
pub struct MemorySources {
  files: HashMap<String, String>,
}

impl MemorySources {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
    self.files.insert(name.into(), text.into());
    self
  }

  pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
    self.files.insert(name.into(), text.into());
  }
}

impl SourceProvider for MemorySources {
  fn read(&self, path: &str) -> io::Result<String> {
    self.files.get(path).cloned().ok_or_else(|| {
      io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file or directory, open '{path}'"),
      )
    })
  }
}
