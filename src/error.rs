//! Failures that stop a stage outright, as opposed to the positioned
//! diagnostics collected in [`crate::diagnostics`].
//!
//! These cover the plumbing around the compiler: unreadable input, an
//! unwritable output file, conflicting invocation options and the safety net
//! for panics escaping a stage.

use snafu::Snafu;

use crate::diagnostics::Diagnostic;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  #[snafu(display("reading file '{path}': {source}"))]
  ReadSource {
    path: String,
    source: std::io::Error,
  },

  #[snafu(display("writing file '{path}': {source}"))]
  WriteOutput {
    path: String,
    source: std::io::Error,
  },

  #[snafu(display("options conflict: '{first}' and '{second}'"))]
  OptionConflict { first: String, second: String },

  #[snafu(display("DevelopmentError: {stage}: {message}"))]
  Internal { stage: String, message: String },

  #[snafu(display("malformed hex: '{text}'"))]
  MalformedHex { text: String },
}

impl CompileError {
  /// Report this failure through the diagnostic stream. I/O failures end
  /// the run and are reported as fatal.
  pub fn to_diagnostic(&self) -> Diagnostic {
    match self {
      CompileError::ReadSource { .. } | CompileError::WriteOutput { .. } => {
        Diagnostic::fatal(self.to_string())
      }
      _ => Diagnostic::unplaced(self.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn conflict_message_names_both_options() {
    let err = CompileError::OptionConflict {
      first: "assemble".into(),
      second: "assembly".into(),
    };
    assert_eq!(
      err.to_diagnostic().to_string(),
      "ccc:error:options conflict: 'assemble' and 'assembly'"
    );
  }

  #[test]
  fn unreadable_input_is_fatal() {
    let err = CompileError::ReadSource {
      path: "missing.c".into(),
      source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
    };
    let diagnostic = err.to_diagnostic();
    assert!(diagnostic.is_error());
    assert_eq!(
      diagnostic.to_string(),
      "ccc:fatal error:reading file 'missing.c': not found"
    );
  }
}
