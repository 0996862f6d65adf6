use crate::ast::{Node, NodeKind};
use crate::lexer::Lexer;
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Errors produced while parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

impl std::error::Error for ParseError {}

impl From<crate::lexer::LexError> for ParseError {
    fn from(e: crate::lexer::LexError) -> Self {
        ParseError {
            message: e.message,
            span: e.span,
        }
    }
}

/// Parse a source string into a program.
pub fn parse(src: &str) -> Result<Vec<Node>, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut p = Parser { tokens, pos: 0 };
    let nodes = p.parse_nodes(None)?;
    if let Some(tok) = p.peek() {
        return Err(ParseError {
            message: format!("unexpected {:?}", tok.kind),
            span: tok.span,
        });
    }
    Ok(nodes)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn last_span(&self) -> Span {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| t.span)
            .unwrap_or_else(|| Span::point(crate::span::Pos::origin()))
    }

    /// Parse nodes until end of input or the given closing token.
    fn parse_nodes(
        &mut self,
        until: Option<&TokenKind>,
    ) -> Result<Vec<Node>, ParseError> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => {
                    if let Some(close) = until {
                        return Err(ParseError {
                            message: format!("missing {close:?}"),
                            span: self.last_span(),
                        });
                    }
                    return Ok(out);
                }
                Some(tok) if Some(&tok.kind) == until => return Ok(out),
                _ => out.push(self.parse_node()?),
            }
        }
    }

    fn parse_node(&mut self) -> Result<Node, ParseError> {
        let tok = self.bump().expect("caller checked");
        let span = tok.span;
        let kind = match tok.kind {
            TokenKind::Real(f) => NodeKind::Real(f),
            TokenKind::String(s) => NodeKind::Str(s),
            TokenKind::Symbol(s) => NodeKind::Symbol(s),
            TokenKind::DotWord(s) => NodeKind::Dot(s),
            TokenKind::CommaWord(s) => NodeKind::Comma(s),
            TokenKind::At => NodeKind::Each,
            TokenKind::Word(w) => {
                if w.len() > 1 && w.ends_with('/') {
                    NodeKind::Fold(w[..w.len() - 1].to_owned())
                } else if w.len() > 1 && w.ends_with('\\') {
                    NodeKind::Scan(w[..w.len() - 1].to_owned())
                } else if w.len() > 1 && w.ends_with('^') {
                    NodeKind::Pairs(w[..w.len() - 1].to_owned())
                } else {
                    NodeKind::Word(w)
                }
            }
            TokenKind::Equals => {
                let Some(next) = self.bump() else {
                    return Err(ParseError {
                        message: "expected name after =".to_owned(),
                        span,
                    });
                };
                match next.kind {
                    TokenKind::Word(name) => NodeKind::Bind(name),
                    other => {
                        return Err(ParseError {
                            message: format!("expected name after =, got {other:?}"),
                            span: next.span,
                        });
                    }
                }
            }
            TokenKind::LBracket => {
                let items = self.parse_nodes(Some(&TokenKind::RBracket))?;
                self.bump(); // closing bracket
                NodeKind::ListLit(items)
            }
            TokenKind::Backslash => return self.parse_lambda(span),
            TokenKind::RBracket => {
                return Err(ParseError {
                    message: "unmatched ]".to_owned(),
                    span,
                });
            }
        };
        let end = self.last_span();
        Ok(Node::new(kind, span.merge(end)))
    }

    fn parse_lambda(&mut self, start: Span) -> Result<Node, ParseError> {
        let mut args = Vec::new();
        loop {
            match self.bump() {
                Some(Token {
                    kind: TokenKind::Word(w),
                    ..
                }) => args.push(w),
                Some(Token {
                    kind: TokenKind::LBracket,
                    ..
                }) => break,
                Some(tok) => {
                    return Err(ParseError {
                        message: format!(
                            "expected argument name or [ in lambda, got {:?}",
                            tok.kind
                        ),
                        span: tok.span,
                    });
                }
                None => {
                    return Err(ParseError {
                        message: "unterminated lambda".to_owned(),
                        span: start,
                    });
                }
            }
        }
        let body = self.parse_nodes(Some(&TokenKind::RBracket))?;
        self.bump(); // closing bracket
        let end = self.last_span();
        Ok(Node::new(NodeKind::Lambda { args, body }, start.merge(end)))
    }
}
