//! Property-based tests for the assembler, encoder and preprocessor.
//!
//! Uses proptest to check invariants over randomly generated programs.

use crate::assembler::assemble;
use crate::opcodes;
use crate::preprocessor::{MacroTable, preprocess};
use crate::source::{MemorySources, join_lines, split_lines};
use proptest::prelude::*;

const MNEMONICS: [&str; 9] = [
  "ADD", "MUL", "SSTORE", "JUMPDEST", "STOP", "CALLER", "DUP3", "SWAP2", "LOG1",
];

#[derive(Debug, Clone)]
enum Line {
  Mnemonic(usize),
  Literal(u128),
}

fn line() -> impl Strategy<Value = Line> {
  prop_oneof![
    (0..MNEMONICS.len()).prop_map(Line::Mnemonic),
    any::<u128>().prop_map(Line::Literal),
  ]
}

fn byte_len(value: u64) -> usize {
  let bits = (u64::BITS - value.leading_zeros()) as usize;
  bits.div_ceil(8).max(1)
}

// ========================================================================
// Encoder round trip
// ========================================================================

proptest! {
  /// Decoding the bytecode of a label-free program gives back its opcodes.
  #[test]
  fn prop_decode_recovers_opcodes(lines in prop::collection::vec(line(), 0..40)) {
    let mut text = String::from(".code\n");
    for line in &lines {
      match line {
        Line::Mnemonic(i) => text.push_str(MNEMONICS[*i]),
        Line::Literal(value) => text.push_str(&value.to_string()),
      }
      text.push('\n');
    }

    let (assembled, diags) = assemble(split_lines("src", &text));
    prop_assert!(diags.is_empty());
    let assembled = assembled.expect("assembled");
    let decoded = opcodes::decode(&assembled.bin).expect("decoded");
    prop_assert_eq!(decoded, assembled.opcodes);
  }
}

// ========================================================================
// Label resolution
// ========================================================================

proptest! {
  /// Every reference ends up with the narrowest PUSH that holds the
  /// address it points at, and the address is where the label landed.
  #[test]
  fn prop_push_width_is_minimal(refs in 1usize..12, words in 0usize..40) {
    let mut text = String::from(".code\n");
    text.push_str(&"end\n".repeat(refs));
    text.push_str(&format!("0x{}\n", "ab".repeat(32)).repeat(words));
    text.push_str("end:\n");

    let (assembled, diags) = assemble(split_lines("src", &text));
    prop_assert!(diags.is_empty());
    let ops = assembled.expect("assembled").opcodes;

    for pair in ops[..refs * 2].chunks(2) {
      let width: usize = pair[0].trim_start_matches("PUSH").parse().expect("push width");
      let address = u64::from_str_radix(&pair[1][2..], 16).expect("address");
      prop_assert_eq!(width, byte_len(address));
      prop_assert_eq!(address as usize, refs * (1 + width) + 33 * words);
    }
  }
}

// ========================================================================
// Preprocessor
// ========================================================================

fn plain_line() -> impl Strategy<Value = String> {
  let word = prop_oneof![
    "[a-z_][a-z0-9_]{0,6}",
    "[1-9][0-9]{0,4}",
    prop::sample::select(vec!["+", "-", ";", "(", ")", "=", ","]).prop_map(String::from),
  ];
  (prop::collection::vec(word, 0..8), prop::sample::select(vec![" ", "  ", "\t"]))
    .prop_map(|(words, blank)| words.join(blank))
}

proptest! {
  /// Text with no directives and no macro names passes through unchanged.
  #[test]
  fn prop_preprocessing_plain_text_is_identity(lines in prop::collection::vec(plain_line(), 1..12)) {
    let text = lines.join("\n");
    let mut macros = MacroTable::new();
    let out = preprocess(split_lines("src", &text), &mut macros, &MemorySources::new());
    prop_assert!(out.diagnostics.is_empty());
    prop_assert_eq!(join_lines(&out.lines), text);
  }
}
