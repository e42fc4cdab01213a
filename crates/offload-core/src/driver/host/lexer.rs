use logos::Logos;
use std::ops::Range;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"([ \t\r\n\f]+|//[^\n]*|#[^\n]*|/\*([^*]|\*+[^*/])*\*+/)")]
pub(crate) enum Token {
    #[token("__kernel")]
    #[token("kernel")]
    Kernel,
    #[token("void")]
    Void,
    #[token("__global")]
    #[token("global")]
    Global,
    #[token("__constant")]
    #[token("constant")]
    Constant,
    #[token("__local")]
    #[token("local")]
    Local,
    #[token("__private")]
    #[token("private")]
    Private,
    #[token("const")]
    Const,
    #[token("restrict")]
    #[token("__restrict")]
    Restrict,

    #[token("int")]
    Int,
    #[token("uint")]
    UInt,
    #[token("unsigned")]
    Unsigned,
    #[token("size_t")]
    SizeT,

    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("return")]
    Return,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Number(i64),
    #[regex(r"[0-9]+[uU]", |lex| lex.slice().trim_end_matches(['u', 'U']).parse::<i64>().ok())]
    UNumber(i64),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token("*")]
    Star,

    #[token("=")]
    Assign,
    #[token("+=")]
    AddAssign,
    #[token("-=")]
    SubAssign,
    #[token("*=")]
    MulAssign,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
}

/// Lexing failure at a byte range of the source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LexError {
    pub span: Range<usize>,
}

pub(crate) fn lex(source: &str) -> Result<Vec<(Token, Range<usize>)>, LexError> {
    Token::lexer(source)
        .spanned()
        .map(|(tok, span)| match tok {
            Ok(t) => Ok((t, span)),
            Err(()) => Err(LexError { span }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_win_over_identifiers() {
        assert_eq!(
            kinds("__kernel void k(__global int* v)"),
            vec![
                Token::Kernel,
                Token::Void,
                Token::Ident("k".into()),
                Token::LParen,
                Token::Global,
                Token::Int,
                Token::Star,
                Token::Ident("v".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn comments_and_directives_are_skipped() {
        let src = "#pragma OPENCL EXTENSION foo : enable\n// line\n/* block\n * x */ 42u";
        assert_eq!(kinds(src), vec![Token::UNumber(42)]);
        assert_eq!(kinds("7 7U"), vec![Token::Number(7), Token::UNumber(7)]);
    }

    #[test]
    fn longest_operator_match() {
        assert_eq!(
            kinds("a += b <= c && d"),
            vec![
                Token::Ident("a".into()),
                Token::AddAssign,
                Token::Ident("b".into()),
                Token::Le,
                Token::Ident("c".into()),
                Token::AndAnd,
                Token::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn unknown_character_reports_span() {
        let err = lex("int x = 1 @ 2;").unwrap_err();
        assert_eq!(err.span, 10..11);
    }
}
