use crate::diagnostic::Diagnostic;
use crate::span::Span;
use crate::token::{Keyword, Token, TokenKind, TokenValue};

pub struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Scan the whole source. Errors are collected, not fatal: the
    /// scanner skips the offending byte and keeps going so that one
    /// pass reports every bad character.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        while self.pos < self.source.len() {
            let start = self.pos;
            let ch = self.source[self.pos];

            if ch == b'#' {
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else if ch.is_ascii_whitespace() {
                self.pos += 1;
            } else if let Some(kind) = single_char_kind(ch) {
                tokens.push(Token::new(kind, start as u32, None));
                self.pos += 1;
            } else if is_word_char(ch) {
                tokens.push(self.scan_word(start));
            } else if ch.is_ascii_digit() {
                if let Some(tok) = self.scan_int(start) {
                    tokens.push(tok);
                }
            } else {
                self.diagnostics.push(
                    Diagnostic::error(
                        format!("unexpected character '{}' (U+{:04X})", ch as char, ch),
                        Span::point(start as u32),
                    )
                    .with_help(
                        "this character is not recognized as part of Timber syntax".to_string(),
                    ),
                );
                self.pos += 1;
            }
        }
        reclassify(&mut tokens);
        (tokens, self.diagnostics)
    }

    fn scan_word(&mut self, start: usize) -> Token {
        while self.pos < self.source.len() && is_word_char(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos])
            .unwrap_or_default()
            .to_string();
        Token::new(TokenKind::Word, start as u32, Some(TokenValue::Word(text)))
    }

    fn scan_int(&mut self, start: usize) -> Option<Token> {
        while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or_default();
        match text.parse::<i32>() {
            Ok(n) => Some(Token::new(
                TokenKind::Int,
                start as u32,
                Some(TokenValue::Int(n)),
            )),
            Err(_) => {
                self.diagnostics.push(
                    Diagnostic::error(
                        format!("integer literal '{}' is too large", text),
                        Span::new(start as u32, self.pos as u32),
                    )
                    .with_help(format!("maximum integer value is {}", i32::MAX)),
                );
                None
            }
        }
    }
}

/// Second pass: reclassify reserved words to `Keyword`, and a lone `=`
/// word to `Eq` so that assignment has its own token. Only `kind` and
/// `value` change; `index` is untouched.
fn reclassify(tokens: &mut [Token]) {
    for token in tokens {
        let Some(text) = token.word() else { continue };
        if let Some(kw) = Keyword::from_str(text) {
            token.kind = TokenKind::Keyword;
            token.value = Some(TokenValue::Keyword(kw));
        } else if text == "=" {
            token.kind = TokenKind::Eq;
            token.value = None;
        }
    }
}

fn single_char_kind(ch: u8) -> Option<TokenKind> {
    match ch {
        b',' => Some(TokenKind::Comma),
        b'(' => Some(TokenKind::LParen),
        b')' => Some(TokenKind::RParen),
        b'[' => Some(TokenKind::LBrack),
        b']' => Some(TokenKind::RBrack),
        b'{' => Some(TokenKind::LBrace),
        b'}' => Some(TokenKind::RBrace),
        b';' => Some(TokenKind::Semi),
        _ => None,
    }
}

/// The word character class. Operator punctuation is included so that
/// `+`, `<`, etc. can name functions; digits are not, so `x1` scans as
/// two tokens.
fn is_word_char(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || matches!(ch, b'_' | b'+' | b'-' | b'=' | b'*' | b'/' | b'<' | b'>' | b'%' | b'!')
}
