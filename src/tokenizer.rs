//! Lexical analysis: turns source lines into a lazy stream of tokens.
//!
//! The lexer is pull-based. Each call to [`Lexer::next_token`] classifies the
//! next lexeme on the current line and advances the cursor; line breaks and
//! end of input are tokens too, so the preprocessor and the assembler can see
//! line structure. Multi-character operators are resolved by one character
//! of lookahead.
//!
//! Numbers are normalised to a minimal lowercase hex representation and
//! strings to the hex encoding of their raw bytes, which is what every later
//! stage wants to work with.

use std::fmt;
use std::rc::Rc;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Num, Zero};

use crate::diagnostics::Diagnostic;
use crate::source::{Position, SourceLine};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
  /// Numeric literal; `hex` is `0x` followed by the minimal lowercase digits.
  Number { hex: String, decimal: bool },
  /// Quoted string; `hex` encodes the raw bytes between the quotes.
  Str { hex: String, len: usize },
  Symbol,
  Operator,
  /// `#`, `{` and `}`: structural, never part of an expression.
  Punct,
  LineComment,
  CommentOpen,
  CommentClose,
  /// Verbatim text inside a comment.
  CommentText,
  Space,
  Eol,
  Eof,
}

/// Lexical information needed by later stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  pub pos: Position,
}

impl Token {
  pub fn new(kind: TokenKind, text: impl Into<String>, pos: Position) -> Self {
    Self {
      kind,
      text: text.into(),
      pos,
    }
  }

  pub fn is(&self, text: &str) -> bool {
    self.text == text && !matches!(self.kind, TokenKind::Str { .. })
  }

  pub fn is_eof(&self) -> bool {
    self.kind == TokenKind::Eof
  }

  pub fn is_eol(&self) -> bool {
    self.kind == TokenKind::Eol
  }

  /// Blanks and line breaks.
  pub fn is_space(&self) -> bool {
    matches!(self.kind, TokenKind::Space | TokenKind::Eol)
  }

  pub fn is_symbol(&self) -> bool {
    self.kind == TokenKind::Symbol
  }

  pub fn is_operator(&self) -> bool {
    self.kind == TokenKind::Operator
  }

  pub fn is_number(&self) -> bool {
    matches!(self.kind, TokenKind::Number { .. })
  }

  pub fn is_string(&self) -> bool {
    matches!(self.kind, TokenKind::Str { .. })
  }

  pub fn is_constant(&self) -> bool {
    self.is_number() || self.is_string()
  }
}

/// A character the lexer could not classify, or a string that ran off the
/// end of its line. The lexer has already skipped the rest of the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
  pub pos: Position,
  pub message: String,
}

impl fmt::Display for LexError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.pos, self.message)
  }
}

impl From<LexError> for Diagnostic {
  fn from(err: LexError) -> Self {
    Diagnostic::error(&err.pos, err.message)
  }
}

enum Pulled {
  Char(char),
  Eol,
  Eof,
}

/// Cursor over a list of source lines.
#[derive(Debug, Clone)]
pub struct Lexer {
  lines: Vec<SourceLine>,
  line: usize,
  chars: Vec<char>,
  column: usize,
}

impl Lexer {
  pub fn new(mut lines: Vec<SourceLine>) -> Self {
    if lines.is_empty() {
      lines.push(SourceLine::new(Rc::from(""), "", 1));
    }
    let chars = lines[0].text.chars().collect();
    Self {
      lines,
      line: 0,
      chars,
      column: 0,
    }
  }

  /// Position of the next character to be pulled.
  pub fn position(&self) -> Position {
    let line = &self.lines[self.line];
    Position::new(line.filename.clone(), line.nr, self.column + 1)
  }

  /// Skip whatever is left of the current line; the next token is its `Eol`.
  pub fn skip_line(&mut self) {
    self.column = self.chars.len();
  }

  /// Take the rest of the current line as comment text. With `close` set the
  /// text stops in front of a `*/`, which is then the next token.
  pub fn comment_text(&mut self, close: bool) -> Option<Token> {
    let pos = self.position();
    let rest = &self.chars[self.column..];
    let end = if close {
      rest.windows(2).position(|pair| pair == ['*', '/'])
    } else {
      None
    };
    let len = end.unwrap_or(rest.len());
    if len == 0 {
      return None;
    }
    let text: String = rest[..len].iter().collect();
    self.column += len;
    Some(Token::new(TokenKind::CommentText, text, pos))
  }

  fn peek(&self) -> Option<char> {
    self.chars.get(self.column).copied()
  }

  fn pull(&mut self) -> Pulled {
    if self.column >= self.chars.len() {
      if self.line + 1 >= self.lines.len() {
        return Pulled::Eof;
      }
      self.line += 1;
      self.column = 0;
      self.chars = self.lines[self.line].text.chars().collect();
      return Pulled::Eol;
    }
    let c = self.chars[self.column];
    self.column += 1;
    Pulled::Char(c)
  }

  fn error(&mut self, pos: Position, message: impl Into<String>) -> LexError {
    self.skip_line();
    LexError {
      pos,
      message: message.into(),
    }
  }

  /// Lex the next token.
  pub fn next_token(&mut self) -> Result<Token, LexError> {
    let pos = self.position();
    let c = match self.pull() {
      Pulled::Eof => return Ok(Token::new(TokenKind::Eof, "", pos)),
      Pulled::Eol => return Ok(Token::new(TokenKind::Eol, "", pos)),
      Pulled::Char(c) => c,
    };

    let token = |kind: TokenKind, text: String| Token::new(kind, text, pos.clone());

    match c {
      ' ' | '\t' | '\r' => Ok(token(TokenKind::Space, c.to_string())),
      '(' | ')' | ',' | '.' | ';' | '?' | '[' | ']' | '^' => {
        Ok(token(TokenKind::Operator, c.to_string()))
      }
      '#' | '{' | '}' => Ok(token(TokenKind::Punct, c.to_string())),
      '"' | '\'' => self.string(c, pos.clone()),
      '@' | '~' | '$' => Ok(self.operator(c, false, false, false, pos.clone())),
      '!' | '%' | '*' | '/' | ':' => Ok(self.operator(c, false, true, false, pos.clone())),
      '+' | '-' => Ok(self.operator(c, true, true, true, pos.clone())),
      '=' => Ok(self.operator(c, true, false, false, pos.clone())),
      '&' | '<' | '>' | '|' => Ok(self.operator(c, true, true, false, pos.clone())),
      _ => self.constant(c, pos.clone()),
    }
  }

  fn operator(&mut self, c: char, repeat: bool, equal: bool, once: bool, pos: Position) -> Token {
    let next = self.peek();
    let mut text = c.to_string();

    if c == '-' && next == Some('>') {
      self.column += 1;
      text.push('>');
      return Token::new(TokenKind::Operator, text, pos);
    }

    let comment = match (c, next) {
      ('/', Some('/')) => Some(TokenKind::LineComment),
      ('/', Some('*')) => Some(TokenKind::CommentOpen),
      ('*', Some('/')) => Some(TokenKind::CommentClose),
      _ => None,
    };
    if let Some(kind) = comment {
      self.column += 1;
      text.extend(next);
      return Token::new(kind, text, pos);
    }

    if equal && next == Some('=') {
      self.column += 1;
      text.push('=');
      return Token::new(TokenKind::Operator, text, pos);
    }

    if repeat && next == Some(c) {
      self.column += 1;
      text.push(c);
      if !once && self.peek() == Some('=') {
        self.column += 1;
        text.push('=');
      }
    }

    Token::new(TokenKind::Operator, text, pos)
  }

  fn string(&mut self, quote: char, pos: Position) -> Result<Token, LexError> {
    let mut raw = String::new();

    loop {
      match self.peek() {
        None => {
          let end = Position::new(pos.filename.clone(), pos.line, self.chars.len() + 1);
          return Err(self.error(end, "unexpected end of line in string"));
        }
        Some(c) if c == quote => {
          self.column += 1;
          break;
        }
        Some('\\') => {
          self.column += 1;
          raw.push('\\');
          if let Some(escaped) = self.peek() {
            self.column += 1;
            raw.push(escaped);
          }
        }
        Some(c) => {
          self.column += 1;
          raw.push(c);
        }
      }
    }

    let hex = format!("0x{}", bytes_to_hex(raw.as_bytes()));
    let text = format!("{quote}{raw}{quote}");
    Ok(Token::new(TokenKind::Str { hex, len: raw.len() }, text, pos))
  }

  fn constant(&mut self, c: char, pos: Position) -> Result<Token, LexError> {
    if c == '0' && matches!(self.peek(), Some('x' | 'X')) {
      self.column += 1;
      let digits = self.take_while(|c| c.is_ascii_hexdigit());
      let text = format!("0{}{digits}", self.chars[self.column - digits.len() - 1]);
      let hex = match BigUint::from_str_radix(&digits, 16) {
        Ok(value) => format!("0x{}", value.to_str_radix(16)),
        Err(_) => return Err(self.error(pos, format!("invalid hex number: '{text}'"))),
      };
      return Ok(Token::new(TokenKind::Number { hex, decimal: false }, text, pos));
    }

    if c.is_ascii_digit() {
      let text = format!("{c}{}", self.take_while(|c| c.is_ascii_digit()));
      let hex = match BigUint::from_str_radix(&text, 10) {
        Ok(value) => format!("0x{}", value.to_str_radix(16)),
        Err(_) => return Err(self.error(pos, format!("invalid decimal number: '{text}'"))),
      };
      return Ok(Token::new(TokenKind::Number { hex, decimal: true }, text, pos));
    }

    if c.is_ascii_alphabetic() || c == '_' {
      let text = format!("{c}{}", self.take_while(|c| c.is_ascii_alphanumeric() || c == '_'));
      return Ok(Token::new(TokenKind::Symbol, text, pos));
    }

    let rest: String = self.chars[self.column - 1..].iter().collect();
    let here = Position::new(pos.filename.clone(), pos.line, self.column);
    Err(self.error(here, format!("unexpected character at: '{rest}'")))
  }

  fn take_while(&mut self, accept: impl Fn(char) -> bool) -> String {
    let mut taken = String::new();
    while let Some(c) = self.peek()
      && accept(c)
    {
      taken.push(c);
      self.column += 1;
    }
    taken
  }
}

/// Lowercase hex of raw bytes, two digits per byte.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
  bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Render a value as `0x…`/`-0x…` with minimal lowercase digits.
pub fn to_hex(value: &BigInt) -> String {
  let digits = value.magnitude().to_str_radix(16);
  match value.sign() {
    Sign::Minus => format!("-0x{digits}"),
    _ => format!("0x{digits}"),
  }
}

/// Parse a `0x…`/`-0x…` string produced by [`to_hex`].
pub fn parse_hex(text: &str) -> Option<BigInt> {
  let (negative, body) = match text.strip_prefix('-') {
    Some(rest) => (true, rest),
    None => (false, text),
  };
  let digits = body
    .strip_prefix("0x")
    .or_else(|| body.strip_prefix("0X"))?;
  if digits.is_empty() {
    return Some(BigInt::zero());
  }
  let magnitude = BigInt::from_str_radix(digits, 16).ok()?;
  Some(if negative { -magnitude } else { magnitude })
}

/// Bytes needed to hold the digits of a `0x…` string, at least one.
pub fn hex_byte_len(hex: &str) -> usize {
  let digits = hex.trim_start_matches('-').len().saturating_sub(2);
  digits.div_ceil(2).max(1)
}

/// Drain the lexer into a vector, stopping after `Eof`.
#[cfg(test)]
pub fn tokenize(lines: Vec<SourceLine>) -> (Vec<Token>, Vec<LexError>) {
  let mut lexer = Lexer::new(lines);
  let mut tokens = Vec::new();
  let mut errors = Vec::new();
  loop {
    match lexer.next_token() {
      Ok(token) => {
        let eof = token.is_eof();
        tokens.push(token);
        if eof {
          break;
        }
      }
      Err(err) => errors.push(err),
    }
  }
  (tokens, errors)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::split_lines;

  fn lex(text: &str) -> (Vec<Token>, Vec<LexError>) {
    tokenize(split_lines("src", text))
  }

  fn texts(text: &str) -> Vec<String> {
    lex(text)
      .0
      .into_iter()
      .filter(|t| !t.is_space() && !t.is_eof())
      .map(|t| t.text)
      .collect()
  }

  #[test]
  fn resolves_multi_character_operators() {
    assert_eq!(
      texts("a++ -- -> += == === &&= <<= || != ^ $x @y"),
      vec![
        "a", "++", "--", "->", "+=", "==", "===", "&&=", "<<=", "||", "!=", "^", "$", "x", "@", "y"
      ]
    );
    assert_eq!(texts("+++"), vec!["++", "+"]);
    assert_eq!(texts("a=-1"), vec!["a", "=", "-", "1"]);
  }

  #[test]
  fn comment_markers_are_not_operators() {
    let (tokens, _) = lex("a // b /* c */");
    let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
    assert!(kinds.contains(&TokenKind::LineComment));
    assert!(kinds.contains(&TokenKind::CommentOpen));
    assert!(kinds.contains(&TokenKind::CommentClose));
  }

  #[test]
  fn numbers_are_normalised_to_minimal_hex() {
    let (tokens, errors) = lex("10 0x00FF 0");
    assert!(errors.is_empty());
    let numbers: Vec<_> = tokens
      .iter()
      .filter_map(|t| match &t.kind {
        TokenKind::Number { hex, decimal } => Some((hex.clone(), *decimal)),
        _ => None,
      })
      .collect();
    assert_eq!(
      numbers,
      vec![
        ("0xa".to_string(), true),
        ("0xff".to_string(), false),
        ("0x0".to_string(), true)
      ]
    );
  }

  #[test]
  fn strings_are_hex_encoded_without_quotes() {
    let (tokens, _) = lex("'test' \"\"");
    assert_eq!(
      tokens[0].kind,
      TokenKind::Str {
        hex: "0x74657374".into(),
        len: 4
      }
    );
    assert_eq!(tokens[0].text, "'test'");
    assert_eq!(
      tokens[2].kind,
      TokenKind::Str {
        hex: "0x".into(),
        len: 0
      }
    );
  }

  #[test]
  fn positions_are_one_based_and_eol_sits_past_the_line() {
    let (tokens, _) = lex("ab cd\nx");
    assert_eq!(tokens[0].pos.column, 1);
    assert_eq!(tokens[2].pos.column, 4);
    assert!(tokens[3].is_eol());
    assert_eq!((tokens[3].pos.line, tokens[3].pos.column), (1, 6));
    assert_eq!((tokens[4].pos.line, tokens[4].pos.column), (2, 1));
    assert!(tokens[5].is_eof());
  }

  #[test]
  fn bad_characters_skip_the_rest_of_the_line() {
    let (tokens, errors) = lex("lab\u{20ac}l\n\n   \"endless string\\n\\");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].to_string(), "src:1:4:unexpected character at: '\u{20ac}l'");
    assert_eq!(errors[1].to_string(), "src:3:22:unexpected end of line in string");
    assert_eq!(tokens[0].text, "lab");
    assert!(tokens[1].is_eol());
  }

  #[test]
  fn hex_helpers_round_trip_signed_values() {
    let value = BigInt::from(-2);
    assert_eq!(to_hex(&value), "-0x2");
    assert_eq!(parse_hex("-0x2"), Some(value));
    assert_eq!(to_hex(&BigInt::from(16)), "0x10");
    assert_eq!(hex_byte_len("0x10"), 1);
    assert_eq!(hex_byte_len("0x100"), 2);
    assert_eq!(hex_byte_len("0x"), 1);
  }
}
