//! End-to-end runs of the compiler over files on disk.

use std::fs;
use std::path::Path;

use ccc::{CompileOptions, CompileOutput, FileSystem, compile};
use tempfile::tempdir;

fn write(dir: &Path, name: &str, text: &str) -> String {
  let path = dir.join(name);
  fs::write(&path, text).expect("write source");
  path.to_string_lossy().into_owned()
}

fn run(text: &str, options: &CompileOptions) -> (CompileOutput, String) {
  let dir = tempdir().expect("tempdir");
  let path = write(dir.path(), "main.c", text);
  (compile(&path, options, &FileSystem), path)
}

#[test]
fn contract_compiles_to_deployable_bytecode() {
  let options = CompileOptions {
    assembly: true,
    opcode: true,
    ..Default::default()
  };
  let (output, _) = run(
    "contract token {\nexport storage uint256 supply = 1000;\nexport void transfer(address to, uint256 amount) {}\n};\n",
    &options,
  );
  assert_eq!(output.diagnostics.message_lines(), Vec::<String>::new());

  let contract = &output.contracts["token"];
  let assembly = contract.assembly.as_deref().expect("assembly");
  assert!(assembly.contains("runtime {\n"));
  let opcodes = contract.opcodes.as_deref().expect("opcodes");
  assert_eq!(&opcodes[..5], &["PUSH2", "0x3E8", "PUSH1", "0x0", "SSTORE"]);
  assert_eq!(opcodes.last().map(String::as_str), Some("STOP"));
  assert!(contract.bin.starts_with("6103E8600055"));
  assert_eq!(
    ccc::opcodes::decode(&contract.bin).expect("decodes"),
    opcodes.to_vec()
  );
}

#[test]
fn includes_resolve_next_to_the_including_file() {
  let dir = tempdir().expect("tempdir");
  fs::create_dir(dir.path().join("lib")).expect("mkdir");
  write(&dir.path().join("lib"), "defs.h", "#define VALUE 7\n");
  let main = write(
    dir.path(),
    "main.c",
    "#include \"lib/defs.h\"\nVALUE\n",
  );

  let options = CompileOptions {
    preprocess: true,
    ..Default::default()
  };
  let output = compile(&main, &options, &FileSystem);
  let preprocessed = output.preprocessed.expect("preprocessed");
  assert!(preprocessed.lines().any(|line| line == "7"));
  assert!(
    output
      .diagnostics
      .messages()
      .iter()
      .all(|diag| !diag.message.contains("reading file"))
  );
}

#[test]
fn macros_expand_at_definition_time() {
  let options = CompileOptions {
    preprocess: true,
    ..Default::default()
  };
  let (output, _) = run(
    "#define test1 test3 test4\n#define test test1 test2\ntest\n",
    &options,
  );
  let preprocessed = output.preprocessed.expect("preprocessed");
  let expanded: Vec<_> = preprocessed.lines().nth(2).expect("line 3").split_whitespace().collect();
  assert_eq!(expanded, ["test3", "test4", "test2"]);
}

#[test]
fn command_line_defines_reach_the_source() {
  let mut options = CompileOptions {
    preprocess: true,
    ..Default::default()
  };
  options.defines.insert("WIDTH".into(), "32".into());
  let (output, _) = run("#ifdef WIDTH\nuint WIDTH\n#endif\n", &options);
  let preprocessed = output.preprocessed.expect("preprocessed");
  assert_eq!(preprocessed.lines().nth(1), Some("uint 32"));
}

#[test]
fn assembly_input_is_assembled() {
  let options = CompileOptions {
    assemble: true,
    ..Default::default()
  };
  let (output, _) = run(".code\n10\n", &options);
  assert!(!output.has_errors());
  assert_eq!(output.contracts["default"].bin, "600A");
}

#[test]
fn unresolved_label_drops_the_contract() {
  let options = CompileOptions {
    assemble: true,
    ..Default::default()
  };
  let (output, path) = run(".code\nnowhere\nnowhere\n", &options);
  assert_eq!(
    output.diagnostics.message_lines(),
    vec![format!("ccc:error:{path}:2:1:unresolved label: 'nowhere'")]
  );
  assert!(output.contracts.is_empty());
}

#[test]
fn redeclaration_names_the_earlier_line() {
  let (output, path) = run(
    "contract {\nexport storage uint8 z;\nvoid a();\nvoid a() pure;\n};\n",
    &CompileOptions::default(),
  );
  assert_eq!(
    output.diagnostics.message_lines(),
    vec![format!(
      "ccc:error:{path}:4:1:new declaration of 'void a() export pure' previously declared at line 3"
    )]
  );
  assert!(output.contracts.is_empty());
}

#[test]
fn oversized_arrays_are_diagnostics_not_crashes() {
  let (output, path) = run(
    "contract {\nexport storage uint8 z;\nint8 a[0xffffffff][0xffffffff];\nint8 b[0x400000000000000];\nint8 c[0x400000000000000];\n};\n",
    &CompileOptions::default(),
  );
  assert_eq!(
    output.diagnostics.message_lines(),
    vec![
      format!("ccc:error:{path}:3:8:array dimension too large"),
      format!("ccc:error:{path}:5:6:contract memory exhausted by 'c'"),
    ]
  );
  assert!(output.contracts.is_empty());
}

#[test]
fn self_inclusion_is_reported() {
  let dir = tempdir().expect("tempdir");
  let main = write(dir.path(), "main.c", "#include \"main.c\"\n");
  let output = compile(&main, &CompileOptions::default(), &FileSystem);
  assert_eq!(
    output.diagnostics.message_lines(),
    vec![format!("ccc:error:{main}:1:10:recursive '#include' of 'main.c'")]
  );
}
