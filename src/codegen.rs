//! Code generation: lower a compiled contract into assembly text.
//!
//! The deploy code stores every constant initializer (storage variables with
//! `SSTORE`, memory variables with `MSTORE`), then copies the nested
//! `runtime` block out of the deployed code and returns it. The runtime
//! block has one `JUMPDEST` entry per defined exported function, labelled
//! with its mangled signature.
//!
//! Nothing else is lowered yet. Statements that would need code (function
//! bodies, non-constant initializers, contract-level expressions) are
//! reported as errors so no contract silently loses behaviour.

use num_bigint::BigInt;
use num_traits::{One, Signed};

use crate::context::Modifier;
use crate::diagnostics::Diagnostics;
use crate::parser::{Expr, ExprKind};
use crate::scope::Contract;
use crate::tokenizer::to_hex;

/// Emit assembly for a contract, reporting what can't be lowered.
pub fn generate(contract: &Contract, diags: &mut Diagnostics) -> String {
  for statement in &contract.scope.statements {
    check_statement(statement, diags);
  }
  for function in contract.scope.functions.values() {
    if function.defined && function.scope.statements.iter().any(needs_code) {
      let message = format!(
        "code generation not supported for function body: '{}'",
        function.extended
      );
      diags.error(&function.first, message);
    }
  }

  let mut asm = String::new();
  asm.push_str(&format!("// contract {}\n", contract.name));
  asm.push_str(".code\n");

  for var in contract.scope.variables.values() {
    let Some(value) = &var.value else {
      continue;
    };
    let target = match (var.storage_slot, var.memory_offset) {
      (Some(slot), _) => (slot, "SSTORE"),
      (None, Some(offset)) => (offset, "MSTORE"),
      (None, None) => continue,
    };
    emit_word(&mut asm, value);
    asm.push_str(&format!("{}\n{}\n", target.0, target.1));
  }

  asm.push_str("runtime_length\n");
  asm.push_str("DUP1\n");
  asm.push_str("runtime\n");
  asm.push_str("0\n");
  asm.push_str("CODECOPY\n");
  asm.push_str("0\n");
  asm.push_str("RETURN\n");

  asm.push_str("runtime {\n");
  asm.push_str(".code\n");
  let entries = contract
    .scope
    .functions
    .values()
    .filter(|f| f.defined && f.has(Modifier::Export));
  for function in entries {
    asm.push_str(&format!("{}:\n", function.signature));
  }
  asm.push_str("STOP\n");
  asm.push_str("}\n");

  asm
}

fn check_statement(expr: &Expr, diags: &mut Diagnostics) {
  match &expr.kind {
    ExprKind::List(items) => {
      for item in items {
        check_statement(item, diags);
      }
    }
    ExprKind::Assign {
      op: None,
      target,
      value,
    } if matches!(target.kind, ExprKind::Declaration { .. }) => {
      if value.value().is_none() {
        let message = format!(
          "code generation not supported for non-constant initializer: '{}'",
          target_name(target)
        );
        diags.error(&expr.pos, message);
      }
    }
    _ if needs_code(expr) => {
      diags.error(&expr.pos, "code generation not supported for statement");
    }
    _ => {}
  }
}

/// Whether a statement does anything beyond declaring names.
fn needs_code(expr: &Expr) -> bool {
  match &expr.kind {
    ExprKind::Declaration { .. } | ExprKind::Type | ExprKind::Empty => false,
    ExprKind::List(items) => items.iter().any(needs_code),
    _ => true,
  }
}

fn target_name(target: &Expr) -> &str {
  match &target.kind {
    ExprKind::Declaration { name } => name,
    _ => "",
  }
}

/// A constant as one 256-bit word; negatives in two's complement.
fn emit_word(asm: &mut String, value: &BigInt) {
  let word = if value.is_negative() {
    (BigInt::one() << 256u32) + value
  } else {
    value.clone()
  };
  asm.push_str(&to_hex(&word));
  asm.push('\n');
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::compiler::compile;
  use crate::source::split_lines;

  fn lower(text: &str) -> (String, Vec<String>) {
    let (program, diags) = compile(split_lines("src", text));
    assert!(!diags.has_errors(), "{:?}", diags.error_lines());
    let contract = program.contract("x").expect("contract x");
    let mut diags = Diagnostics::new();
    let asm = generate(contract, &mut diags);
    (asm, diags.message_lines())
  }

  #[test]
  fn stores_initializers_and_copies_runtime() {
    let (asm, messages) = lower(
      "contract x {\nexport storage uint8 s = 5;\nint8 m = -2;\nint8 n;\nexport void f() {}\nvoid g() {}\nvoid h() export;\n};\n",
    );
    assert_eq!(messages, Vec::<String>::new());
    let expected = format!(
      "// contract x\n.code\n0x5\n0\nSSTORE\n0x{}fe\n0\nMSTORE\nruntime_length\nDUP1\nruntime\n0\nCODECOPY\n0\nRETURN\nruntime {{\n.code\nF1f:\nSTOP\n}}\n",
      "f".repeat(62)
    );
    assert_eq!(asm, expected);
  }

  #[test]
  fn empty_contract_still_deploys() {
    let (asm, _) = lower("contract x {\n};\n");
    assert!(asm.starts_with("// contract x\n.code\nruntime_length\n"));
    assert!(asm.ends_with("runtime {\n.code\nSTOP\n}\n"));
  }

  #[test]
  fn unlowered_code_is_reported() {
    let (_, messages) = lower(
      "contract x {\nexport storage uint8 s = 5;\nuint8 m = s;\nuint8 k = 1, j = s;\nexport void f() {\nint8 b;\n}\nexport void g(uint8 a) {\ns = a;\n}\n};\n",
    );
    assert_eq!(
      messages,
      vec![
        "ccc:error:src:3:7:code generation not supported for non-constant initializer: 'm'",
        "ccc:error:src:4:14:code generation not supported for non-constant initializer: 'j'",
        "ccc:error:src:8:1:code generation not supported for function body: 'void g(uint8 a) export'",
      ]
    );
  }
}
