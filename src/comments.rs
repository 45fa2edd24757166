//! Comment filter: a decorator over the [`Lexer`] that hides `//` and
//! `/* */` regions from the stage pulling tokens.
//!
//! Comment tokens are not thrown away outright. When the filter is built with
//! `keep_comments` they are queued so the preprocessor can copy them into its
//! output verbatim; the compiler builds it without and never sees them.

use crate::diagnostics::Diagnostics;
use crate::source::SourceLine;
use crate::tokenizer::{Lexer, Token, TokenKind};

pub struct CommentFilter {
  lexer: Lexer,
  keep_comments: bool,
  comments: Vec<Token>,
}

impl CommentFilter {
  pub fn new(lines: Vec<SourceLine>, keep_comments: bool) -> Self {
    Self {
      lexer: Lexer::new(lines),
      keep_comments,
      comments: Vec::new(),
    }
  }

  /// Comment tokens seen since the last call, in source order.
  pub fn take_comments(&mut self) -> Vec<Token> {
    std::mem::take(&mut self.comments)
  }

  /// Next token outside any comment. Lexical errors are reported and the
  /// lexer resumes at the end of the offending line.
  pub fn next_token(&mut self, diags: &mut Diagnostics) -> Token {
    loop {
      let token = match self.lexer.next_token() {
        Ok(token) => token,
        Err(err) => {
          diags.push(err.into());
          continue;
        }
      };

      match token.kind {
        TokenKind::LineComment => {
          self.keep(token);
          if let Some(text) = self.lexer.comment_text(false) {
            self.keep(text);
          }
        }
        TokenKind::CommentOpen => {
          self.keep(token);
          if let Some(eof) = self.block_comment(diags) {
            return eof;
          }
        }
        _ => return token,
      }
    }
  }

  /// Consume a block comment up to and including its `*/`. Returns the `Eof`
  /// token when the file ends first.
  fn block_comment(&mut self, diags: &mut Diagnostics) -> Option<Token> {
    loop {
      if let Some(text) = self.lexer.comment_text(true) {
        self.keep(text);
      }
      let token = match self.lexer.next_token() {
        Ok(token) => token,
        Err(err) => {
          diags.push(err.into());
          continue;
        }
      };
      if token.is_eof() {
        diags.error(&token.pos, "unexpected end of file in multiline comment");
        return Some(token);
      }
      let closed = token.kind == TokenKind::CommentClose;
      self.keep(token);
      if closed {
        return None;
      }
    }
  }

  fn keep(&mut self, token: Token) {
    if self.keep_comments {
      self.comments.push(token);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::split_lines;

  fn visible(text: &str) -> (Vec<String>, Diagnostics) {
    let mut filter = CommentFilter::new(split_lines("src", text), false);
    let mut diags = Diagnostics::new();
    let mut out = Vec::new();
    loop {
      let token = filter.next_token(&mut diags);
      if token.is_eof() {
        break;
      }
      if !token.is_space() {
        out.push(token.text);
      }
    }
    (out, diags)
  }

  #[test]
  fn drops_line_and_block_comments() {
    let (tokens, diags) = visible("a // b c\nd /* e\n f */ g");
    assert_eq!(tokens, vec!["a", "d", "g"]);
    assert!(diags.is_empty());
  }

  #[test]
  fn comment_text_is_not_lexed() {
    let (tokens, diags) = visible("a // caf\u{e9} \"\n/* \u{20ac} */ b");
    assert_eq!(tokens, vec!["a", "b"]);
    assert!(diags.is_empty());
  }

  #[test]
  fn line_comment_keeps_its_line_break() {
    let mut filter = CommentFilter::new(split_lines("src", "a // b\nc"), true);
    let mut diags = Diagnostics::new();
    assert_eq!(filter.next_token(&mut diags).text, "a");
    assert!(filter.next_token(&mut diags).is_space());
    assert!(filter.next_token(&mut diags).is_eol());
    let comments: Vec<_> = filter.take_comments().into_iter().map(|t| t.text).collect();
    assert_eq!(comments, vec!["//", " b"]);
  }

  #[test]
  fn unterminated_block_comment_is_an_error() {
    let (tokens, diags) = visible("a /* b\nc");
    assert_eq!(tokens, vec!["a"]);
    assert_eq!(
      diags.message_lines(),
      vec!["ccc:error:src:2:2:unexpected end of file in multiline comment"]
    );
  }
}
