use crate::span::{Pos, Span};
use crate::token::{Token, TokenKind};

/// Characters that may form operator words (`+`, `<=`, `+/`, ...).
fn is_op_char(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '%' | '<' | '>' | '=' | '!' | '&' | '|' | '^'
            | '$' | '~' | '?'
    )
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Errors produced while lexing.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

impl std::error::Error for LexError {}

/// Hand-rolled lexer over a source string.
///
/// Comments run from `;` to end of line. Tokens are separated by
/// whitespace except where the grammar makes adjacency unambiguous
/// (brackets, `\`, `@`, `.word`, `,word`).
pub struct Lexer<'a> {
    src: &'a str,
    chars: std::str::CharIndices<'a>,
    peeked: Option<(usize, char)>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices(),
            peeked: None,
            line: 1,
            column: 1,
        }
    }

    /// Lex the whole input.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();
        while let Some(tok) = self.next_token()? {
            out.push(tok);
        }
        Ok(out)
    }

    fn pos(&self) -> Pos {
        let offset = match self.peeked {
            Some((i, _)) => i,
            None => self.src.len(),
        };
        Pos::new(offset, self.line, self.column)
    }

    fn peek(&mut self) -> Option<char> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked.map(|(_, c)| c)
    }

    fn peek2(&mut self) -> Option<char> {
        self.peek();
        self.chars.clone().next().map(|(_, c)| c)
    }

    fn bump(&mut self) -> Option<char> {
        self.peek();
        let (_, c) = self.peeked.take()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_trivia();
        let start = self.pos();
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let kind = match c {
            '[' => {
                self.bump();
                TokenKind::LBracket
            }
            ']' => {
                self.bump();
                TokenKind::RBracket
            }
            '\\' => {
                self.bump();
                TokenKind::Backslash
            }
            '@' => {
                self.bump();
                TokenKind::At
            }
            '"' => self.lex_string(start)?,
            '\'' => {
                self.bump();
                let word = self.take_word();
                if word.is_empty() {
                    return Err(self.error(start, "expected symbol name after '"));
                }
                TokenKind::Symbol(word)
            }
            '.' => {
                if self.peek2().is_some_and(|c| c.is_ascii_digit()) {
                    self.lex_number(start)?
                } else {
                    self.bump();
                    let word = self.take_word();
                    if word.is_empty() {
                        return Err(self.error(start, "expected name after ."));
                    }
                    TokenKind::DotWord(word)
                }
            }
            ',' => {
                self.bump();
                let word = self.take_word();
                if word.is_empty() {
                    return Err(self.error(start, "expected name after ,"));
                }
                TokenKind::CommaWord(word)
            }
            '-' if self.peek2().is_some_and(|c| c.is_ascii_digit() || c == '.') => {
                self.lex_number(start)?
            }
            c if c.is_ascii_digit() => self.lex_number(start)?,
            c if is_word_start(c) => {
                let mut word = self.take_word();
                // trailing fold/scan adverb glued onto an identifier
                if matches!(self.peek(), Some('/') | Some('\\')) {
                    word.push(self.bump().unwrap());
                }
                TokenKind::Word(word)
            }
            c if is_op_char(c) => {
                let mut word = String::new();
                while let Some(c) = self.peek() {
                    if is_op_char(c) {
                        word.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                // `+\` is the scan adverb on `+`, not a lambda start
                if self.peek() == Some('\\') {
                    word.push('\\');
                    self.bump();
                }
                if word == "=" {
                    TokenKind::Equals
                } else {
                    TokenKind::Word(word)
                }
            }
            c => {
                return Err(self.error(start, &format!("unexpected character {c:?}")));
            }
        };

        let span = Span::new(start, self.pos());
        Ok(Some(Token::new(kind, span)))
    }

    fn take_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if is_word_char(c) {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn lex_string(&mut self, start: Pos) -> Result<TokenKind, LexError> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(start, "unterminated string")),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some(c) => {
                        return Err(self.error(
                            start,
                            &format!("unknown string escape {c:?}"),
                        ));
                    }
                    None => return Err(self.error(start, "unterminated string")),
                },
                Some(c) => s.push(c),
            }
        }
        Ok(TokenKind::String(s))
    }

    fn lex_number(&mut self, start: Pos) -> Result<TokenKind, LexError> {
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push('-');
            self.bump();
        }

        // hex form
        if self.peek() == Some('0') && matches!(self.peek2(), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            let mut hex = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    hex.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            if hex.is_empty() {
                return Err(self.error(start, "expected hex digits after 0x"));
            }
            let value = u64::from_str_radix(&hex, 16)
                .map_err(|_| self.error(start, "hex literal out of range"))?;
            let value = value as f64;
            return Ok(TokenKind::Real(if text.starts_with('-') {
                -value
            } else {
                value
            }));
        }

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if self.peek() == Some('.')
            && self.peek2().is_some_and(|c| c.is_ascii_digit())
        {
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        } else if self.peek() == Some('.') && text.ends_with(|c: char| c.is_ascii_digit())
        {
            // `5.` form
            text.push('.');
            self.bump();
        } else if text.is_empty() || text == "-" {
            // `.5` form
            if self.peek() == Some('.') {
                text.push('0');
                text.push('.');
                self.bump();
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            text.push('e');
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                text.push(self.bump().unwrap());
            }
            let mut any = false;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                    any = true;
                } else {
                    break;
                }
            }
            if !any {
                return Err(self.error(start, "expected exponent digits"));
            }
        }

        text.parse::<f64>()
            .map(TokenKind::Real)
            .map_err(|_| self.error(start, "malformed number"))
    }

    fn error(&self, start: Pos, message: &str) -> LexError {
        LexError {
            message: message.to_owned(),
            span: Span::new(start, self.pos()),
        }
    }
}
