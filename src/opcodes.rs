//! EVM opcode table, bytecode encoder and decoder.
//!
//! Mnemonics map to fixed one-byte opcodes. Anything else handed to the
//! encoder must be a `0x…` immediate, which is written out as raw bytes.
//! `PUSH1`..`PUSH32`, `DUP1`..`DUP16`, `SWAP1`..`SWAP16` and `LOG0`..`LOG4`
//! are generated from their first opcode.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{CompileResult, MalformedHexSnafu};

macro_rules! define_opcodes {
  ($($name:ident = $byte:expr),* $(,)?) => {
    const FIXED: &[(&str, u8)] = &[$((stringify!($name), $byte)),*];
  };
}

define_opcodes! {
  STOP = 0x00, ADD = 0x01, MUL = 0x02, SUB = 0x03, DIV = 0x04, SDIV = 0x05,
  MOD = 0x06, SMOD = 0x07, ADDMOD = 0x08, MULMOD = 0x09, EXP = 0x0a, SIGNEXTEND = 0x0b,

  LT = 0x10, GT = 0x11, SLT = 0x12, SGT = 0x13, EQ = 0x14, ISZERO = 0x15,
  AND = 0x16, OR = 0x17, XOR = 0x18, NOT = 0x19, BYTE = 0x1a, SHL = 0x1b,
  SHR = 0x1c, SAR = 0x1d,

  SHA3 = 0x20,

  ADDRESS = 0x30, BALANCE = 0x31, ORIGIN = 0x32, CALLER = 0x33, CALLVALUE = 0x34,
  CALLDATALOAD = 0x35, CALLDATASIZE = 0x36, CALLDATACOPY = 0x37, CODESIZE = 0x38,
  CODECOPY = 0x39, GASPRICE = 0x3a, EXTCODESIZE = 0x3b, EXTCODECOPY = 0x3c,
  RETURNDATASIZE = 0x3d, RETURNDATACOPY = 0x3e, EXTCODEHASH = 0x3f,

  BLOCKHASH = 0x40, COINBASE = 0x41, TIMESTAMP = 0x42, NUMBER = 0x43,
  DIFFICULTY = 0x44, GASLIMIT = 0x45,

  POP = 0x50, MLOAD = 0x51, MSTORE = 0x52, MSTORE8 = 0x53, SLOAD = 0x54,
  SSTORE = 0x55, JUMP = 0x56, JUMPI = 0x57, PC = 0x58, MSIZE = 0x59, GAS = 0x5a,
  JUMPDEST = 0x5b,

  CREATE = 0xf0, CALL = 0xf1, CALLCODE = 0xf2, RETURN = 0xf3, DELEGATECALL = 0xf4,
  CREATE2 = 0xf5, STATICCALL = 0xfa, REVERT = 0xfd, INVALID = 0xfe,
  SELFDESTRUCT = 0xff,
}

/// Families of numbered opcodes: prefix, first opcode, first number, count.
const FAMILIES: [(&str, u8, u8, u8); 4] = [
  ("PUSH", 0x60, 1, 32),
  ("DUP", 0x80, 1, 16),
  ("SWAP", 0x90, 1, 16),
  ("LOG", 0xa0, 0, 5),
];

struct Table {
  by_name: HashMap<String, u8>,
  by_byte: Vec<Option<String>>,
}

static TABLE: Lazy<Table> = Lazy::new(|| {
  let mut table = Table {
    by_name: HashMap::new(),
    by_byte: vec![None; 256],
  };
  let mut add = |name: String, byte: u8| {
    table.by_byte[byte as usize] = Some(name.clone());
    table.by_name.insert(name, byte);
  };
  for &(name, byte) in FIXED {
    add(name.to_string(), byte);
  }
  for (prefix, first, start, count) in FAMILIES {
    for i in 0..count {
      add(format!("{prefix}{}", start + i), first + i);
    }
  }
  table
});

/// Opcode of a mnemonic, case-insensitively.
pub fn lookup(name: &str) -> Option<u8> {
  TABLE.by_name.get(&name.to_ascii_uppercase()).copied()
}

pub fn is_mnemonic(name: &str) -> bool {
  lookup(name).is_some()
}

/// Mnemonic of an opcode byte, if it is assigned.
pub fn mnemonic(byte: u8) -> Option<&'static str> {
  TABLE.by_byte[byte as usize].as_deref()
}

/// `PUSHn` for an immediate of `width` bytes.
pub fn push(width: usize) -> String {
  format!("PUSH{width}")
}

/// Immediate width of a `PUSHn` opcode byte.
fn push_width(byte: u8) -> Option<usize> {
  (0x60..=0x7f)
    .contains(&byte)
    .then(|| (byte - 0x5f) as usize)
}

/// Encode mnemonics and `0x` immediates into an uppercase bytecode string.
pub fn encode(ops: &[String]) -> CompileResult<String> {
  let mut bin = String::new();
  for op in ops {
    if let Some(byte) = lookup(op) {
      bin.push_str(&format!("{byte:02X}"));
      continue;
    }
    let digits = op
      .strip_prefix("0x")
      .or_else(|| op.strip_prefix("0X"))
      .filter(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_hexdigit()));
    let Some(digits) = digits else {
      return MalformedHexSnafu { text: op.clone() }.fail();
    };
    if digits.len() % 2 == 1 {
      bin.push('0');
    }
    bin.push_str(&digits.to_ascii_uppercase());
  }
  Ok(bin)
}

/// Decode a bytecode string back into mnemonics and minimal `0x`
/// immediates. Unassigned bytes come back as one-byte immediates.
pub fn decode(bin: &str) -> CompileResult<Vec<String>> {
  let malformed = || MalformedHexSnafu { text: bin.to_string() };
  if bin.len() % 2 == 1 || !bin.chars().all(|c| c.is_ascii_hexdigit()) {
    return malformed().fail();
  }
  let bytes: Vec<u8> = (0..bin.len())
    .step_by(2)
    .map(|i| u8::from_str_radix(&bin[i..i + 2], 16))
    .collect::<Result<_, _>>()
    .map_err(|_| malformed().build())?;

  let mut ops = Vec::new();
  let mut at = 0;
  while at < bytes.len() {
    let byte = bytes[at];
    at += 1;
    let Some(name) = mnemonic(byte) else {
      ops.push(immediate(&[byte]));
      continue;
    };
    ops.push(name.to_string());
    if let Some(width) = push_width(byte) {
      let Some(data) = bytes.get(at..at + width) else {
        return malformed().fail();
      };
      ops.push(immediate(data));
      at += width;
    }
  }
  Ok(ops)
}

/// Minimal uppercase `0x` form of big-endian bytes.
fn immediate(bytes: &[u8]) -> String {
  let digits: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
  let trimmed = digits.trim_start_matches('0');
  if trimmed.is_empty() {
    "0x0".to_string()
  } else {
    format!("0x{trimmed}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CompileError;

  fn ops(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn table_covers_families() {
    assert_eq!(lookup("push1"), Some(0x60));
    assert_eq!(lookup("PUSH32"), Some(0x7f));
    assert_eq!(lookup("dup16"), Some(0x8f));
    assert_eq!(lookup("LOG0"), Some(0xa0));
    assert_eq!(lookup("LOG5"), None);
    assert_eq!(mnemonic(0x5b), Some("JUMPDEST"));
    assert_eq!(mnemonic(0x0c), None);
    assert!(is_mnemonic("add"));
    assert!(!is_mnemonic("label"));
  }

  #[test]
  fn encodes_mnemonics_and_immediates() {
    assert_eq!(encode(&ops(&["PUSH1", "0xA"])).unwrap(), "600A");
    assert_eq!(
      encode(&ops(&["PUSH2", "0x103", "JUMPDEST", "0x74657374"])).unwrap(),
      "6101035B74657374"
    );
  }

  #[test]
  fn rejects_malformed_immediates() {
    let err = encode(&ops(&["PUSH1", "label"])).unwrap_err();
    assert!(matches!(err, CompileError::MalformedHex { ref text } if text == "label"));
    assert!(encode(&ops(&["0x"])).is_err());
  }

  #[test]
  fn decodes_push_immediates() {
    assert_eq!(
      decode("600A61000F00").unwrap(),
      ops(&["PUSH1", "0xA", "PUSH2", "0xF", "STOP"])
    );
    assert_eq!(decode("0C").unwrap(), ops(&["0xC"]));
  }

  #[test]
  fn decode_rejects_truncated_push() {
    assert!(decode("61FF").is_err());
    assert!(decode("6").is_err());
    assert!(decode("ZZ").is_err());
  }
}
