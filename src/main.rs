use std::env;
use std::fs;
use std::io::{self, Write};
use std::process;

use ccc::error::WriteOutputSnafu;
use ccc::{CompileError, CompileOptions, CompileOutput, ContractOutput, Diagnostic, FileSystem};
use indexmap::IndexMap;
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::Serialize;
use snafu::ResultExt;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

const HELP: &str = "Usage: ccc [options] file
Options:
  -A --assembly       Outputs the generated assembly; assumes input is in CCC.
  -a --assemble       Assemble; assumes input is in assembly
  -D<macro>[=<value>] Defines <macro> eventually with its <value>
  -h --help           Prints this help and exits
  -O --opcode         Outputs the generated opcode.
  -o <filename>       The output <filename>; default: stdout
  -p --preprocess     Outputs the preprocessor result; assumes input is in CCC.
  -v --version        Prints the version and exits";

/// Writes log records to stderr with a coloured level tag.
struct Logger;

impl Log for Logger {
  fn enabled(&self, metadata: &Metadata) -> bool {
    metadata.level() <= log::max_level()
  }

  fn log(&self, record: &Record) {
    if !self.enabled(record.metadata()) {
      return;
    }
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let mut spec = ColorSpec::new();
    match record.level() {
      Level::Error => {
        spec.set_fg(Some(Color::Red)).set_bold(true);
      }
      Level::Warn => {
        spec.set_fg(Some(Color::Yellow)).set_bold(true);
      }
      Level::Info => {
        spec.set_fg(Some(Color::Green));
      }
      Level::Debug | Level::Trace => {
        spec.set_fg(Some(Color::Cyan));
      }
    }
    let _ = stderr.set_color(&spec);
    let _ = write!(stderr, "[{:5}]", record.level());
    let _ = stderr.reset();
    let _ = writeln!(stderr, " {}: {}", record.target(), record.args());
  }

  fn flush(&self) {}
}

static LOGGER: Logger = Logger;

/// Logging is off unless `CCC_LOG` names a level.
fn init_logger() {
  let level = env::var("CCC_LOG")
    .ok()
    .and_then(|value| value.parse::<LevelFilter>().ok())
    .unwrap_or(LevelFilter::Off);
  if log::set_logger(&LOGGER).is_ok() {
    log::set_max_level(level);
  }
}

#[derive(Debug, Default)]
struct Invocation {
  options: CompileOptions,
  filename: Option<String>,
  output: Option<String>,
  help: bool,
  version: bool,
  fatal: Vec<String>,
}

impl Invocation {
  fn fatal(&mut self, message: impl Into<String>) {
    self.fatal.push(message.into());
  }

  fn flag(&mut self, name: &str) -> bool {
    let options = &mut self.options;
    match name {
      "assemble" => options.assemble = true,
      "assembly" => options.assembly = true,
      "opcode" => options.opcode = true,
      "preprocess" => options.preprocess = true,
      "help" => self.help = true,
      "version" => self.version = true,
      _ => return false,
    }
    true
  }
}

fn parse_args(args: &[String]) -> Invocation {
  let mut inv = Invocation::default();
  let mut i = 0;

  while i < args.len() {
    let arg = &args[i];
    i += 1;

    if arg.is_empty() {
      inv.fatal("unknown command line option: ''");
      continue;
    }
    if let Some(long) = arg.strip_prefix("--") {
      if !inv.flag(long) {
        inv.fatal(format!("unknown command line option: '{arg}'"));
      }
      continue;
    }
    let Some(flags) = arg.strip_prefix('-') else {
      if inv.filename.is_some() {
        inv.fatal(format!("only one input file: '{arg}'"));
      } else {
        inv.filename = Some(arg.clone());
      }
      continue;
    };

    if flags.is_empty() {
      inv.fatal("unknown command line option: '-'");
    } else if flags.starts_with('o') {
      match args.get(i) {
        Some(file) => {
          inv.output = Some(file.clone());
          i += 1;
        }
        None => inv.fatal("missing output filename after '-o' option"),
      }
    } else if let Some(define) = flags.strip_prefix('D') {
      if define.is_empty() {
        inv.fatal("missing macro name: '-D'");
      } else {
        let (name, value) = define.split_once('=').unwrap_or((define, ""));
        inv.options.defines.insert(name.to_string(), value.to_string());
      }
    } else {
      for short in flags.chars() {
        let name = match short {
          'A' => "assembly",
          'a' => "assemble",
          'h' => "help",
          'O' => "opcode",
          'p' => "preprocess",
          'v' => "version",
          _ => "",
        };
        if !inv.flag(name) {
          inv.fatal(format!("unknown command line option: '-{short}'"));
        }
      }
    }
  }
  inv
}

#[derive(Serialize)]
struct Report<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  preprocessed: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  contracts: Option<&'a IndexMap<String, ContractOutput>>,
}

fn render(output: &CompileOutput) -> Result<String, CompileError> {
  let report = Report {
    preprocessed: output.preprocessed.as_deref(),
    contracts: (!output.contracts.is_empty()).then_some(&output.contracts),
  };
  serde_json::to_string(&report).map_err(|err| CompileError::Internal {
    stage: "output".into(),
    message: err.to_string(),
  })
}

fn write_result(output: &CompileOutput, path: Option<&str>) -> Result<(), CompileError> {
  let json = render(output)?;
  match path {
    Some(path) => fs::write(path, format!("{json}\n")).context(WriteOutputSnafu { path }),
    None => writeln!(io::stdout(), "{json}").context(WriteOutputSnafu { path: "stdout" }),
  }
}

fn main() {
  init_logger();
  let args: Vec<String> = env::args().skip(1).collect();
  let inv = parse_args(&args);

  for message in &inv.fatal {
    eprintln!("{}", Diagnostic::fatal(message.as_str()));
  }
  if inv.help {
    println!("{HELP}");
    process::exit(0);
  }
  if inv.version {
    println!("ccc (CC's C - EVM compiler) {}", env!("CARGO_PKG_VERSION"));
    process::exit(0);
  }
  if !inv.fatal.is_empty() {
    process::exit(1);
  }
  let Some(filename) = inv.filename else {
    eprintln!("{}", Diagnostic::fatal("no input file"));
    process::exit(1);
  };

  let output = ccc::compile(&filename, &inv.options, &FileSystem);
  if let Err(err) = write_result(&output, inv.output.as_deref()) {
    eprintln!("{}", err.to_diagnostic());
    process::exit(1);
  }
  for line in output.diagnostics.message_lines() {
    eprintln!("{line}");
  }
  if output.has_errors() {
    process::exit(1);
  }
}
