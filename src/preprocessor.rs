//! Textual macro preprocessor.
//!
//! Directives are recognised only when `#` sits in the first column. The
//! output keeps one line per input line (directives and suppressed regions
//! become blank lines, included files are spliced in after the `#include`
//! line), so every later diagnostic still points at the right source line.
//! Comments are copied through untouched and are never macro-expanded.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::comments::CommentFilter;
use crate::diagnostics::Diagnostics;
use crate::source::{SourceLine, SourceProvider, split_lines};
use crate::tokenizer::{Token, TokenKind};

/// Macro name to replacement text.
pub type MacroTable = IndexMap<String, String>;

#[derive(Debug)]
struct Conditional {
  satisfied: bool,
  seen_else: bool,
}

/// Result of preprocessing one file.
#[derive(Debug, Clone, Default)]
pub struct Preprocessed {
  pub lines: Vec<SourceLine>,
  pub diagnostics: Diagnostics,
}

/// Preprocess `lines`, reading `#include`d files through `sources`. The macro
/// table is shared with included files, so definitions flow forward across
/// inclusion.
pub fn preprocess(
  lines: Vec<SourceLine>,
  macros: &mut MacroTable,
  sources: &dyn SourceProvider,
) -> Preprocessed {
  nested(lines, macros, sources, Vec::new())
}

/// `including` holds the files whose `#include` led here, outermost first.
fn nested(
  lines: Vec<SourceLine>,
  macros: &mut MacroTable,
  sources: &dyn SourceProvider,
  mut including: Vec<String>,
) -> Preprocessed {
  let filename = lines
    .first()
    .map(|line| line.filename.clone())
    .unwrap_or_else(|| Rc::from(""));
  let first = lines.first().map(|line| line.nr).unwrap_or(1);
  including.push(filename.to_string());

  let preprocessor = Preprocessor {
    filter: CommentFilter::new(lines, true),
    macros,
    sources,
    including,
    conditionals: Vec::new(),
    output: vec![SourceLine::new(filename, "", first)],
    diags: Diagnostics::new(),
  };
  preprocessor.run()
}

struct Preprocessor<'a> {
  filter: CommentFilter,
  macros: &'a mut MacroTable,
  sources: &'a dyn SourceProvider,
  including: Vec<String>,
  conditionals: Vec<Conditional>,
  output: Vec<SourceLine>,
  diags: Diagnostics,
}

impl Preprocessor<'_> {
  fn run(mut self) -> Preprocessed {
    let eof = loop {
      let token = self.pull();
      if token.is_eof() {
        break token;
      }
      if token.pos.column == 1 && token.is("#") {
        self.directive(&token);
      } else {
        self.emit(&token, true);
      }
    };

    if !self.conditionals.is_empty() {
      self
        .diags
        .error(&eof.pos, "unexpected end of file when '#endif' expected");
    }

    log::debug!(
      "preprocessed {} into {} lines",
      eof.pos.filename,
      self.output.len()
    );

    Preprocessed {
      lines: self.output,
      diagnostics: self.diags,
    }
  }

  fn pushing(&self) -> bool {
    self.conditionals.iter().all(|c| c.satisfied)
  }

  /// Pull the next token, copying any comment passed over into the output.
  fn pull(&mut self) -> Token {
    let token = self.filter.next_token(&mut self.diags);
    for comment in self.filter.take_comments() {
      self.emit(&comment, false);
    }
    token
  }

  fn emit(&mut self, token: &Token, expand: bool) {
    if token.is_eol() {
      self.new_line(token);
      return;
    }
    if !self.pushing() {
      return;
    }
    let text = match self.macros.get(&token.text) {
      Some(value) if expand && token.is_symbol() => value.clone(),
      _ => token.text.clone(),
    };
    if let Some(line) = self.output.last_mut() {
      line.text.push_str(&text);
    }
  }

  fn new_line(&mut self, eol: &Token) {
    self
      .output
      .push(SourceLine::new(eol.pos.filename.clone(), "", eol.pos.line + 1));
  }

  /// Remaining tokens of a directive line and the token that ended it.
  fn rest_of_line(&mut self) -> (Vec<Token>, Token) {
    let mut tokens = Vec::new();
    loop {
      let token = self.pull();
      if token.is_eol() {
        self.new_line(&token);
        return (tokens, token);
      }
      if token.is_eof() {
        return (tokens, token);
      }
      tokens.push(token);
    }
  }

  fn directive(&mut self, hash: &Token) {
    let keyword = self.pull();

    if keyword.is_eol() || keyword.is_eof() {
      self
        .diags
        .error(&keyword.pos, "unexpected end of line after token '#'");
      if keyword.is_eol() {
        self.new_line(&keyword);
      }
      return;
    }
    if keyword.kind == TokenKind::Space {
      self
        .diags
        .error(&keyword.pos, "unexpected white space after token '#'");
      self.rest_of_line();
      return;
    }

    let (tokens, end) = self.rest_of_line();
    match keyword.text.as_str() {
      "define" => self.define(&tokens, &end),
      "undef" => self.undef(&tokens, &end),
      "ifdef" => self.ifdef(&tokens, &end, true),
      "ifndef" => self.ifdef(&tokens, &end, false),
      "else" => self.else_(hash, &tokens),
      "endif" => self.endif(hash, &tokens),
      "error" => self.message(hash, &tokens, true),
      "warning" => self.message(hash, &tokens, false),
      "include" => self.include(&tokens, &end),
      other => self
        .diags
        .error(&keyword.pos, format!("unexpected token '{other}'")),
    }
  }

  fn expand(&self, token: &Token) -> String {
    match self.macros.get(&token.text) {
      Some(value) if token.is_symbol() => value.clone(),
      _ => token.text.clone(),
    }
  }

  fn define(&mut self, tokens: &[Token], end: &Token) {
    let mut rest = tokens.iter().skip_while(|t| t.is_space());
    let Some(name) = rest.next() else {
      self
        .diags
        .error(&end.pos, "unexpected end of line after token '#define'");
      return;
    };
    if !name.is_symbol() {
      self
        .diags
        .error(&name.pos, format!("unexpected token '{}'", name.text));
      return;
    }

    let value: String = rest
      .skip_while(|t| t.is_space())
      .map(|t| self.expand(t))
      .collect();
    if self.pushing() {
      self.macros.insert(name.text.clone(), value);
    }
  }

  /// Exactly one token accepted by `want` among blanks; anything else is
  /// reported.
  fn single<'t>(
    &mut self,
    tokens: &'t [Token],
    end: &Token,
    directive: &str,
    want: fn(&Token) -> bool,
  ) -> Option<&'t Token> {
    let mut found = None;
    for token in tokens.iter().filter(|t| !t.is_space()) {
      if found.is_some() || !want(token) {
        self
          .diags
          .error(&token.pos, format!("unexpected token '{}'", token.text));
        return None;
      }
      found = Some(token);
    }
    if found.is_none() {
      self.diags.error(
        &end.pos,
        format!("unexpected end of line after token '#{directive}'"),
      );
    }
    found
  }

  fn nothing(&mut self, tokens: &[Token]) -> bool {
    match tokens.iter().find(|t| !t.is_space()) {
      Some(token) => {
        self
          .diags
          .error(&token.pos, format!("unexpected token '{}'", token.text));
        false
      }
      None => true,
    }
  }

  fn undef(&mut self, tokens: &[Token], end: &Token) {
    if let Some(name) = self.single(tokens, end, "undef", Token::is_symbol)
      && self.pushing()
    {
      self.macros.shift_remove(&name.text);
    }
  }

  fn ifdef(&mut self, tokens: &[Token], end: &Token, defined: bool) {
    let directive = if defined { "ifdef" } else { "ifndef" };
    if let Some(name) = self.single(tokens, end, directive, Token::is_symbol) {
      let satisfied = self.macros.contains_key(&name.text) == defined;
      self.conditionals.push(Conditional {
        satisfied,
        seen_else: false,
      });
    }
  }

  fn else_(&mut self, hash: &Token, tokens: &[Token]) {
    match self.conditionals.last() {
      None => {
        self
          .diags
          .error(&hash.pos, "unexpected token '#else' without '#if'");
        return;
      }
      Some(top) if top.seen_else => {
        self
          .diags
          .error(&hash.pos, "unexpected token '#else' after '#else'");
        return;
      }
      Some(_) => {}
    }
    if !self.nothing(tokens) {
      return;
    }
    if let Some(top) = self.conditionals.last_mut() {
      top.seen_else = true;
      top.satisfied = !top.satisfied;
    }
  }

  fn endif(&mut self, hash: &Token, tokens: &[Token]) {
    if self.conditionals.is_empty() {
      self
        .diags
        .error(&hash.pos, "unexpected token '#endif' without '#if'");
      return;
    }
    if self.nothing(tokens) {
      self.conditionals.pop();
    }
  }

  fn message(&mut self, hash: &Token, tokens: &[Token], error: bool) {
    if !self.pushing() {
      return;
    }
    let text: String = tokens
      .iter()
      .skip_while(|t| t.is_space())
      .map(|t| t.text.as_str())
      .collect();
    if error {
      self.diags.error(&hash.pos, text);
    } else {
      self.diags.warning(&hash.pos, text);
    }
  }

  fn include(&mut self, tokens: &[Token], end: &Token) {
    let Some(file) = self.single(tokens, end, "include", Token::is_string) else {
      return;
    };
    if matches!(file.kind, TokenKind::Str { len: 0, .. }) {
      self
        .diags
        .error(&file.pos, "empty filename in '#include'");
      return;
    }
    if !self.pushing() {
      return;
    }

    let name = &file.text[1..file.text.len() - 1];
    let path = self.sources.resolve(&file.pos.filename, name);
    if self.including.contains(&path) {
      self
        .diags
        .error(&file.pos, format!("recursive '#include' of '{name}'"));
      return;
    }
    let text = match self.sources.read(&path) {
      Ok(text) => text,
      Err(err) => {
        self
          .diags
          .error(&file.pos, format!("reading file '{name}': {err}"));
        return;
      }
    };

    log::trace!("including {path}");
    let included = nested(
      split_lines(&path, &text),
      self.macros,
      self.sources,
      self.including.clone(),
    );
    self.diags.merge(included.diagnostics);

    let at = if end.is_eol() {
      self.output.len() - 1
    } else {
      self.output.len()
    };
    self.output.splice(at..at, included.lines);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::{MemorySources, join_lines};

  fn run(text: &str) -> Preprocessed {
    run_with(text, MemorySources::new(), MacroTable::new())
  }

  fn run_with(text: &str, sources: MemorySources, mut macros: MacroTable) -> Preprocessed {
    preprocess(split_lines("src", text), &mut macros, &sources)
  }

  fn text_of(out: &Preprocessed) -> String {
    join_lines(&out.lines)
  }

  #[test]
  fn directive_misuse_is_reported() {
    let out = run("#warning\t  a test warning\n#error the error!  \n#\n# include\n#unexpected\n/*\n");
    assert_eq!(
      out.diagnostics.message_lines(),
      vec![
        "ccc:warning:src:1:1:a test warning",
        "ccc:error:src:2:1:the error!  ",
        "ccc:error:src:3:2:unexpected end of line after token '#'",
        "ccc:error:src:4:2:unexpected white space after token '#'",
        "ccc:error:src:5:2:unexpected token 'unexpected'",
        "ccc:error:src:7:1:unexpected end of file in multiline comment",
      ]
    );
  }

  #[test]
  fn defines_expand_and_directive_lines_stay_blank() {
    let out = run("#define test test1 test2\n\na test b\nc\n#define\n#define +\n");
    assert_eq!(text_of(&out), "\n\na test1 test2 b\nc\n\n\n");
    assert_eq!(out.lines[2].nr, 3);
    assert_eq!(
      out.diagnostics.message_lines(),
      vec![
        "ccc:error:src:5:8:unexpected end of line after token '#define'",
        "ccc:error:src:6:9:unexpected token '+'",
      ]
    );
  }

  #[test]
  fn macro_values_expand_at_definition_time() {
    let out = run("#define test1  test3  test4\n#define test test1 test2\n\ntest\n");
    assert_eq!(text_of(&out), "\n\n\ntest3  test4 test2\n");
    assert!(out.diagnostics.is_empty());
  }

  #[test]
  fn conditionals_gate_the_output() {
    let out = run(
      "#define test1\na\n#ifdef test1\n#define test2\nb\n#else\n#define test3\nc\n#ifdef test2\nd\n#else\ne\n#endif\nf\n#endif\ng\n#ifndef test2\nh\n#else\ni\n#ifdef test3\nj\n#error test\n#else\nk\n#endif\nl\n#endif\nm\n",
    );
    let visible: Vec<_> = out
      .lines
      .iter()
      .map(|line| line.text.as_str())
      .filter(|text| !text.is_empty())
      .collect();
    assert_eq!(visible, vec!["a", "b", "g", "i", "k", "l", "m"]);
    assert_eq!(out.lines.len(), 30);
    assert_eq!((out.lines[28].text.as_str(), out.lines[28].nr), ("m", 29));
    assert!(out.diagnostics.is_empty());
  }

  #[test]
  fn conditional_misuse_is_reported() {
    let out = run(
      "#ifdef\n#ifdef +\n#ifndef\n#ifndef +\n#else\n#endif\n#ifdef test\n#else a\n#else\n#else\n#endif a\n#ifdef a b\n",
    );
    assert_eq!(
      out.diagnostics.message_lines(),
      vec![
        "ccc:error:src:1:7:unexpected end of line after token '#ifdef'",
        "ccc:error:src:2:8:unexpected token '+'",
        "ccc:error:src:3:8:unexpected end of line after token '#ifndef'",
        "ccc:error:src:4:9:unexpected token '+'",
        "ccc:error:src:5:1:unexpected token '#else' without '#if'",
        "ccc:error:src:6:1:unexpected token '#endif' without '#if'",
        "ccc:error:src:8:7:unexpected token 'a'",
        "ccc:error:src:10:1:unexpected token '#else' after '#else'",
        "ccc:error:src:11:8:unexpected token 'a'",
        "ccc:error:src:12:10:unexpected token 'b'",
        "ccc:error:src:13:1:unexpected end of file when '#endif' expected",
      ]
    );
  }

  #[test]
  fn undef_removes_a_macro() {
    let out = run("#define test test1\na test\n#undef test\na test\n#undef\n#undef +\n#undef a b\n");
    assert_eq!(text_of(&out), "\na test1\n\na test\n\n\n\n");
    assert_eq!(
      out.diagnostics.message_lines(),
      vec![
        "ccc:error:src:5:7:unexpected end of line after token '#undef'",
        "ccc:error:src:6:8:unexpected token '+'",
        "ccc:error:src:7:10:unexpected token 'b'",
      ]
    );
  }

  #[test]
  fn includes_splice_lines_and_share_macros() {
    let sources = MemorySources::new()
      .with("src1", "#define test test1\n\ntest\n")
      .with("src2", "#warning test");
    let out = run_with(
      "#include \"src1\"\n\n#ifndef test\n#include \"notfound.ccc\"\n#endif\n\ntest\n#include \"src2\"\n#include \"notfound.ccc\"\n#include \"a\" \"b\"\n#include +\n#include\n#include \"\"\n",
      sources,
      MacroTable::new(),
    );

    assert_eq!(out.lines.len(), 19);
    assert_eq!(out.lines[3].text, "test1");
    assert_eq!(&*out.lines[3].filename, "src1");
    assert_eq!(out.lines[10].text, "test1");
    assert_eq!((&*out.lines[10].filename, out.lines[10].nr), ("src", 7));
    assert_eq!(
      out.diagnostics.message_lines(),
      vec![
        "ccc:warning:src2:1:1:test",
        "ccc:error:src:9:10:reading file 'notfound.ccc': no such file or directory, open 'notfound.ccc'",
        "ccc:error:src:10:14:unexpected token '\"b\"'",
        "ccc:error:src:11:10:unexpected token '+'",
        "ccc:error:src:12:9:unexpected end of line after token '#include'",
        "ccc:error:src:13:10:empty filename in '#include'",
      ]
    );
  }

  #[test]
  fn recursive_includes_stop_at_the_repeat() {
    let sources = MemorySources::new()
      .with("a", "#include \"b\"\n")
      .with("b", "one\n#include \"a\"\n");
    let out = run_with("#include \"src\"\n#include \"a\"\ntwo\n", sources, MacroTable::new());
    assert_eq!(
      out.diagnostics.message_lines(),
      vec![
        "ccc:error:src:1:10:recursive '#include' of 'src'",
        "ccc:error:b:2:10:recursive '#include' of 'a'",
      ]
    );
    assert!(out.lines.iter().any(|line| line.text == "one"));
    assert!(out.lines.iter().any(|line| line.text == "two"));
  }

  #[test]
  fn comments_pass_through_unexpanded() {
    let out = run("#define a test\n#define b a // c\n\n/*\n#ifdef a\n#define c test\n#endif\n*/\n\na b c\n");
    assert_eq!(
      text_of(&out),
      "\n// c\n\n/*\n#ifdef a\n#define c test\n#endif\n*/\n\ntest test  c\n"
    );
    assert!(out.diagnostics.is_empty());
  }

  #[test]
  fn command_line_defines_seed_the_table() {
    let mut macros = MacroTable::new();
    macros.insert("c".into(), "test3".into());
    macros.insert("a".into(), String::new());
    let out = run_with(
      "#define test test1 test2\n\na test b\nc\n",
      MemorySources::new(),
      macros,
    );
    assert_eq!(text_of(&out), "\n\n test1 test2 b\ntest3\n");
  }
}
