//! Crate root: wires together the compilation pipeline.
//!
//! The stages are small and composable so they can be evolved
//! independently:
//! - `tokenizer` lexes source lines into a lazy token stream, `comments`
//!   hides comment regions from the stages that don't want them.
//! - `preprocessor` expands macros, evaluates conditionals and splices
//!   `#include`d files.
//! - `parser` owns all syntactic knowledge; `compiler` drives it statement by
//!   statement and registers what it declares in `scope` and `ty`.
//! - `codegen` lowers each contract into assembly text, which `assembler`
//!   resolves and `opcodes` encodes into bytecode.
//! - `diagnostics` and `error` centralise reporting.
//!
//! [`compile`] runs the whole thing. Each stage reports into its own sink,
//! which is merged into the output when the stage ends; a stage that
//! reported errors stops the ones depending on it.

pub mod assembler;
pub mod codegen;
pub mod comments;
pub mod compiler;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod opcodes;
pub mod parser;
pub mod preprocessor;
pub mod scope;
pub mod source;
pub mod tokenizer;
pub mod ty;

#[cfg(test)]
mod property_tests;

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexMap;
use serde::Serialize;
use snafu::ResultExt;

pub use compiler::Program;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{CompileError, CompileResult};
pub use preprocessor::MacroTable;
pub use source::{FileSystem, MemorySources, SourceProvider};

use source::{SourceLine, join_lines, split_lines};

/// What to produce, and how to read the input.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
  /// Macros defined before the first line.
  pub defines: MacroTable,
  /// The input is assembly rather than source.
  pub assemble: bool,
  /// Include the generated assembly text per contract.
  pub assembly: bool,
  /// Include the flattened opcode list per contract.
  pub opcode: bool,
  /// Include the preprocessed text.
  pub preprocess: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContractOutput {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub opcodes: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assembly: Option<String>,
  pub bin: String,
}

#[derive(Debug, Default)]
pub struct CompileOutput {
  pub preprocessed: Option<String>,
  pub contracts: IndexMap<String, ContractOutput>,
  pub diagnostics: Diagnostics,
  /// Global scope and types, when compiling got that far.
  pub program: Option<Program>,
}

impl CompileOutput {
  pub fn has_errors(&self) -> bool {
    self.diagnostics.has_errors()
  }
}

/// Compile (or, with `assemble`, assemble) the file `filename`.
pub fn compile(
  filename: &str,
  options: &CompileOptions,
  sources: &dyn SourceProvider,
) -> CompileOutput {
  let mut output = CompileOutput::default();

  for (requested, name) in [(options.assembly, "assembly"), (options.preprocess, "preprocess")] {
    if options.assemble && requested {
      let conflict = CompileError::OptionConflict {
        first: "assemble".into(),
        second: name.into(),
      };
      output.diagnostics.push(conflict.to_diagnostic());
    }
  }
  if output.has_errors() {
    return output;
  }

  let text = match sources.read(filename).context(error::ReadSourceSnafu { path: filename }) {
    Ok(text) => text,
    Err(err) => {
      output.diagnostics.push(err.to_diagnostic());
      return output;
    }
  };

  let stage = Cell::new("reader");
  let run = panic::catch_unwind(AssertUnwindSafe(|| {
    pipeline(&mut output, filename, &text, options, sources, &stage);
  }));
  if let Err(payload) = run {
    let message = payload
      .downcast_ref::<&str>()
      .map(|s| s.to_string())
      .or_else(|| payload.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "unknown panic".to_string());
    let internal = CompileError::Internal {
      stage: stage.get().to_string(),
      message,
    };
    output.diagnostics.push(internal.to_diagnostic());
  }
  output
}

fn pipeline(
  output: &mut CompileOutput,
  filename: &str,
  text: &str,
  options: &CompileOptions,
  sources: &dyn SourceProvider,
  stage: &Cell<&'static str>,
) {
  let lines = split_lines(filename, text);
  if options.assemble {
    stage.set("assembler");
    add_contract(output, "default", lines, None, options);
    return;
  }

  stage.set("preprocessor");
  let mut macros = options.defines.clone();
  let preprocessed = preprocessor::preprocess(lines, &mut macros, sources);
  output.diagnostics.merge(preprocessed.diagnostics);
  if options.preprocess {
    output.preprocessed = Some(join_lines(&preprocessed.lines));
  }
  if output.has_errors() {
    return;
  }

  stage.set("compiler");
  let (program, diags) = compiler::compile(preprocessed.lines);
  output.diagnostics.merge(diags);
  if !output.has_errors() {
    for contract in program.scope.contracts.values() {
      stage.set("codegen");
      let mut diags = Diagnostics::new();
      let asm = codegen::generate(contract, &mut diags);
      let lowered = !diags.has_errors();
      output.diagnostics.merge(diags);
      if !lowered {
        continue;
      }
      stage.set("assembler");
      let lines = split_lines(&contract.name, &asm);
      add_contract(output, &contract.name, lines, Some(asm), options);
    }
  }
  output.program = Some(program);
}

/// Assemble one contract and record it unless assembling failed.
fn add_contract(
  output: &mut CompileOutput,
  name: &str,
  lines: Vec<SourceLine>,
  assembly: Option<String>,
  options: &CompileOptions,
) {
  let (assembled, diags) = assembler::assemble(lines);
  output.diagnostics.merge(diags);
  let Some(assembled) = assembled else {
    return;
  };
  let contract = ContractOutput {
    opcodes: options.opcode.then_some(assembled.opcodes),
    assembly: assembly.filter(|_| options.assembly),
    bin: assembled.bin,
  };
  output.contracts.insert(name.to_string(), contract);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sources(text: &str) -> MemorySources {
    MemorySources::new().with("src", text)
  }

  #[test]
  fn conflicting_options_compile_nothing() {
    let options = CompileOptions {
      assemble: true,
      assembly: true,
      preprocess: true,
      ..Default::default()
    };
    let output = compile("src", &options, &sources(".code\n10\n"));
    assert_eq!(
      output.diagnostics.message_lines(),
      vec![
        "ccc:error:options conflict: 'assemble' and 'assembly'",
        "ccc:error:options conflict: 'assemble' and 'preprocess'",
      ]
    );
    assert!(output.contracts.is_empty());
  }

  #[test]
  fn missing_input_is_fatal() {
    let output = compile("nope", &CompileOptions::default(), &MemorySources::new());
    let lines = output.diagnostics.message_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("ccc:fatal error:reading file 'nope'"));
    assert!(output.has_errors());
  }

  #[test]
  fn assemble_mode_produces_default_contract() {
    let options = CompileOptions {
      assemble: true,
      opcode: true,
      ..Default::default()
    };
    let output = compile("src", &options, &sources(".code\n10\n"));
    let contract = &output.contracts["default"];
    assert_eq!(contract.bin, "600A");
    assert_eq!(contract.opcodes.as_deref(), Some(&["PUSH1".to_string(), "0xA".to_string()][..]));
    assert!(output.program.is_none());
  }

  #[test]
  fn preprocessing_errors_stop_compiling() {
    let options = CompileOptions {
      preprocess: true,
      ..Default::default()
    };
    let output = compile("src", &options, &sources("#error stop\ncontract x {};\n"));
    assert!(output.has_errors());
    assert!(output.preprocessed.is_some());
    assert!(output.program.is_none());
    assert!(output.contracts.is_empty());
  }

  #[test]
  fn unlowered_contracts_get_no_bytecode() {
    let output = compile(
      "src",
      &CompileOptions::default(),
      &sources("contract x {\nexport storage uint8 s;\nexport void f(uint8 a) {\ns = a;\n}\n};\ncontract y {\nexport storage uint8 t = 1;\n};\n"),
    );
    assert_eq!(
      output.diagnostics.message_lines(),
      vec!["ccc:error:src:3:1:code generation not supported for function body: 'void f(uint8 a) export'"]
    );
    assert!(!output.contracts.contains_key("x"));
    assert!(output.contracts.contains_key("y"));
  }

  #[test]
  fn compiles_contracts_to_bytecode() {
    let options = CompileOptions {
      assembly: true,
      ..Default::default()
    };
    let output = compile(
      "src",
      &options,
      &sources("contract x {\nexport storage uint8 s = 5;\nexport void f() {}\n};\n"),
    );
    assert_eq!(output.diagnostics.message_lines(), Vec::<String>::new());
    let contract = &output.contracts["x"];
    assert!(contract.assembly.as_deref().is_some_and(|a| a.contains("F1f:")));
    assert!(contract.opcodes.is_none());
    // PUSH1 5 PUSH1 0 SSTORE, then the deploy stub.
    assert!(contract.bin.starts_with("6005600055"));
    assert!(contract.bin.ends_with("5B00"));
  }
}
