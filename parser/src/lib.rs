pub mod ast;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;

pub use ast::{Node, NodeKind};
pub use lexer::{LexError, Lexer};
pub use parser::{parse, ParseError};
pub use span::{Pos, Span};
pub use token::{Token, TokenKind};

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<NodeKind> {
        parse(src)
            .expect("parse")
            .into_iter()
            .map(|n| n.kind)
            .collect()
    }

    #[test]
    fn parses_integer() {
        assert_eq!(kinds("42"), vec![NodeKind::Real(42.0)]);
    }

    #[test]
    fn parses_negative_integer() {
        assert_eq!(kinds("-17"), vec![NodeKind::Real(-17.0)]);
    }

    #[test]
    fn parses_float() {
        assert_eq!(kinds("3.14159"), vec![NodeKind::Real(3.14159)]);
    }

    #[test]
    fn parses_scientific_notation() {
        assert_eq!(kinds("1.5e3"), vec![NodeKind::Real(1500.0)]);
        assert_eq!(kinds("2.5e-2"), vec![NodeKind::Real(0.025)]);
    }

    #[test]
    fn parses_hex() {
        assert_eq!(kinds("0xff"), vec![NodeKind::Real(255.0)]);
        assert_eq!(kinds("0xDEAD"), vec![NodeKind::Real(57005.0)]);
    }

    #[test]
    fn parses_leading_decimal() {
        assert_eq!(kinds(".5"), vec![NodeKind::Real(0.5)]);
    }

    #[test]
    fn parses_string() {
        assert_eq!(kinds("\"hello\""), vec![NodeKind::Str("hello".into())]);
        assert_eq!(kinds("\"\""), vec![NodeKind::Str(String::new())]);
        assert_eq!(
            kinds("\"hello world\""),
            vec![NodeKind::Str("hello world".into())]
        );
    }

    #[test]
    fn parses_string_escapes() {
        assert_eq!(kinds(r#""a\nb""#), vec![NodeKind::Str("a\nb".into())]);
    }

    #[test]
    fn parses_symbol() {
        assert_eq!(kinds("'freq"), vec![NodeKind::Symbol("freq".into())]);
    }

    #[test]
    fn parses_words_and_operators() {
        assert_eq!(
            kinds("10 20 +"),
            vec![
                NodeKind::Real(10.0),
                NodeKind::Real(20.0),
                NodeKind::Word("+".into())
            ]
        );
        assert_eq!(kinds("<="), vec![NodeKind::Word("<=".into())]);
        assert_eq!(kinds("=="), vec![NodeKind::Word("==".into())]);
    }

    #[test]
    fn parses_binding() {
        assert_eq!(
            kinds("42 = x x"),
            vec![
                NodeKind::Real(42.0),
                NodeKind::Bind("x".into()),
                NodeKind::Word("x".into())
            ]
        );
    }

    #[test]
    fn parses_list_literal() {
        let k = kinds("[1 2 3]");
        match &k[0] {
            NodeKind::ListLit(items) => {
                let inner: Vec<_> = items.iter().map(|n| n.kind.clone()).collect();
                assert_eq!(
                    inner,
                    vec![
                        NodeKind::Real(1.0),
                        NodeKind::Real(2.0),
                        NodeKind::Real(3.0)
                    ]
                );
            }
            other => panic!("expected list literal, got {other:?}"),
        }
    }

    #[test]
    fn parses_nested_list() {
        let k = kinds("[[1 2] [3 4]]");
        match &k[0] {
            NodeKind::ListLit(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(items[0].kind, NodeKind::ListLit(_)));
            }
            other => panic!("expected list literal, got {other:?}"),
        }
    }

    #[test]
    fn parses_lambda() {
        let k = kinds("\\x [x x +]");
        match &k[0] {
            NodeKind::Lambda { args, body } => {
                assert_eq!(args, &vec!["x".to_owned()]);
                assert_eq!(body.len(), 3);
            }
            other => panic!("expected lambda, got {other:?}"),
        }
    }

    #[test]
    fn parses_quotation() {
        let k = kinds("\\[42]");
        match &k[0] {
            NodeKind::Lambda { args, body } => {
                assert!(args.is_empty());
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected quotation, got {other:?}"),
        }
    }

    #[test]
    fn parses_fold_and_scan_adverbs() {
        assert_eq!(
            kinds("[1 2 3 4] +/")[1],
            NodeKind::Fold("+".into())
        );
        assert_eq!(kinds("[1 2 3 4] +\\")[1], NodeKind::Scan("+".into()));
        assert_eq!(kinds("[1 2 3 4] -^")[1], NodeKind::Pairs("-".into()));
    }

    #[test]
    fn parses_dot_and_comma() {
        assert_eq!(kinds(".play"), vec![NodeKind::Dot("play".into())]);
        assert_eq!(kinds(",freq"), vec![NodeKind::Comma("freq".into())]);
    }

    #[test]
    fn parses_each_adverb() {
        assert_eq!(kinds("@"), vec![NodeKind::Each]);
    }

    #[test]
    fn skips_comments() {
        assert_eq!(
            kinds("1 ; the rest is ignored\n2"),
            vec![NodeKind::Real(1.0), NodeKind::Real(2.0)]
        );
    }

    #[test]
    fn rejects_unmatched_bracket() {
        assert!(parse("[1 2").is_err());
        assert!(parse("1 2]").is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(parse("\"abc").is_err());
    }

}
