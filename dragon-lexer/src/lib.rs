//! Hand-rolled scanner: `source text -> token stream`.
//!
//! The token set includes a secondary "macro mode" group (`$(`, `${`,
//! `)$`, `}$`, `=>`, and `$ident`) that only becomes recognizable after a
//! `#macro` directive has been seen and before the matching `#endmacro`.
//! That statefulness is why this is a hand-written character scanner
//! rather than a generated DFA lexer: the macro token set is not regular
//! in isolation, it depends on a directive seen earlier in the stream.

use dragon_diagnostics::Span;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ident,
    Num,
    Hex,
    Str,
    DollarIdent,

    Var,
    Del,
    Def,
    Class,
    Method,
    Attr,
    If,
    Else,
    While,
    Return,
    As,
    New,
    Import,
    Macro,
    Endmacro,

    Eq,
    EqEq,
    BangEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Bang,
    Arrow,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Dot,
    Comma,
    Semicolon,
    Colon,

    DollarLParen,
    DollarLBrace,
    RParenDollar,
    RBraceDollar,
    FatArrow,

    Eof,
}

/// A scanned token. Value-equal on `(kind, text)` only — position is not
/// part of identity, matching the reference scanner's token equality.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.text == other.text
    }
}
impl Eq for Token {}

#[derive(Debug, Error, Clone)]
pub enum LexError {
    #[error("unexpected character '{ch}'")]
    UnexpectedChar { ch: char, span: Span },
    #[error("unterminated string literal")]
    UnterminatedString { span: Span },
    #[error("unknown directive '#{word}'")]
    UnknownDirective { word: String, span: Span },
    #[error("'$' is only valid inside a macro definition")]
    DollarOutsideMacro { span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { span, .. }
            | LexError::UnterminatedString { span, .. }
            | LexError::UnknownDirective { span, .. }
            | LexError::DollarOutsideMacro { span } => *span,
        }
    }
}

impl dragon_diagnostics::IntoDiagnostic for LexError {
    fn into_diagnostic(self) -> dragon_diagnostics::Diagnostic {
        let span = self.span();
        dragon_diagnostics::Diagnostic::new(span, self.to_string())
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "var" => TokenKind::Var,
        "del" => TokenKind::Del,
        "def" => TokenKind::Def,
        "class" => TokenKind::Class,
        "method" => TokenKind::Method,
        "attr" => TokenKind::Attr,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "return" => TokenKind::Return,
        "as" => TokenKind::As,
        "new" => TokenKind::New,
        _ => return None,
    })
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    macro_mode: bool,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Scanner { chars: source.chars().collect(), pos: 0, line: 1, col: 0, macro_mode: false }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn starts_with(&self, lit: &str) -> bool {
        let lit_chars: Vec<char> = lit.chars().collect();
        if self.pos + lit_chars.len() > self.chars.len() {
            return false;
        }
        self.chars[self.pos..self.pos + lit_chars.len()] == lit_chars[..]
    }

    fn make_span(&self, start_line: usize, start_col: usize, len: usize) -> Span {
        Span::new(start_line, start_col, start_col + len)
    }

    fn scan_all(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => {
                    tokens.push(Token { kind: TokenKind::Eof, text: String::new(), span: Span::point(self.line, self.col) });
                    break;
                }
                Some('#') => {
                    if let Some(tok) = self.scan_directive()? {
                        tokens.push(tok);
                    }
                }
                Some('$') => tokens.push(self.scan_dollar()?),
                Some(c) if c.is_ascii_digit() => tokens.push(self.scan_number()),
                Some('"') => tokens.push(self.scan_string()?),
                Some(c) if c == '_' || c.is_alphabetic() => tokens.push(self.scan_ident()),
                Some(_) => tokens.push(self.scan_operator()?),
            }
        }
        Ok(tokens)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn scan_directive(&mut self) -> Result<Option<Token>, LexError> {
        let start_line = self.line;
        let start_col = self.col;
        self.advance(); // '#'
        if matches!(self.peek(), Some(c) if c.is_whitespace()) || self.peek().is_none() {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.advance();
            }
            return Ok(None);
        }
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let span = self.make_span(start_line, start_col, word.len() + 1);
        match word.as_str() {
            "macro" => {
                self.macro_mode = true;
                Ok(Some(Token { kind: TokenKind::Macro, text: format!("#{word}"), span }))
            }
            "endmacro" => {
                self.macro_mode = false;
                Ok(Some(Token { kind: TokenKind::Endmacro, text: format!("#{word}"), span }))
            }
            "import" => Ok(Some(Token { kind: TokenKind::Import, text: format!("#{word}"), span })),
            _ => Err(LexError::UnknownDirective { word, span }),
        }
    }

    fn scan_dollar(&mut self) -> Result<Token, LexError> {
        let start_line = self.line;
        let start_col = self.col;
        if !self.macro_mode {
            self.advance();
            return Err(LexError::DollarOutsideMacro { span: self.make_span(start_line, start_col, 1) });
        }
        if self.starts_with("$(") {
            self.advance();
            self.advance();
            return Ok(Token { kind: TokenKind::DollarLParen, text: "$(".into(), span: self.make_span(start_line, start_col, 2) });
        }
        if self.starts_with("${") {
            self.advance();
            self.advance();
            return Ok(Token { kind: TokenKind::DollarLBrace, text: "${".into(), span: self.make_span(start_line, start_col, 2) });
        }
        self.advance(); // '$'
        let next_is_ident_start = matches!(self.peek(), Some(c) if c == '_' || c.is_alphabetic());
        if !next_is_ident_start {
            return Err(LexError::UnexpectedChar { ch: '$', span: self.make_span(start_line, start_col, 1) });
        }
        let mut word = String::from("$");
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let span = self.make_span(start_line, start_col, word.len());
        Ok(Token { kind: TokenKind::DollarIdent, text: word, span })
    }

    fn scan_number(&mut self) -> Token {
        let start_line = self.line;
        let start_col = self.col;
        if self.starts_with("0x") || self.starts_with("0X") {
            let mut text = String::new();
            text.push(self.advance().unwrap_or('0'));
            text.push(self.advance().unwrap_or('x'));
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            let span = self.make_span(start_line, start_col, text.len());
            return Token { kind: TokenKind::Hex, text, span };
        }
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let span = self.make_span(start_line, start_col, text.len());
        Token { kind: TokenKind::Num, text, span }
    }

    fn scan_string(&mut self) -> Result<Token, LexError> {
        let start_line = self.line;
        let start_col = self.col;
        let mut text = String::from("\"");
        self.advance(); // opening quote
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(LexError::UnterminatedString { span: self.make_span(start_line, start_col, text.len()) });
                }
                Some('\\') => {
                    text.push('\\');
                    self.advance();
                    if let Some(escaped) = self.peek() {
                        text.push(escaped);
                        self.advance();
                    }
                }
                Some('"') => {
                    text.push('"');
                    self.advance();
                    break;
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        let span = self.make_span(start_line, start_col, text.len());
        Ok(Token { kind: TokenKind::Str, text, span })
    }

    fn scan_ident(&mut self) -> Token {
        let start_line = self.line;
        let start_col = self.col;
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let span = self.make_span(start_line, start_col, text.len());
        let kind = keyword(&text).unwrap_or(TokenKind::Ident);
        Token { kind, text, span }
    }

    fn scan_operator(&mut self) -> Result<Token, LexError> {
        let start_line = self.line;
        let start_col = self.col;

        if self.macro_mode {
            for (lit, kind) in [(")$", TokenKind::RParenDollar), ("}$", TokenKind::RBraceDollar), ("=>", TokenKind::FatArrow)] {
                if self.starts_with(lit) {
                    self.advance();
                    self.advance();
                    return Ok(Token { kind, text: lit.into(), span: self.make_span(start_line, start_col, 2) });
                }
            }
        }

        const TWO_CHAR: &[(&str, TokenKind)] = &[
            ("->", TokenKind::Arrow),
            ("==", TokenKind::EqEq),
            ("!=", TokenKind::BangEq),
            ("<=", TokenKind::LtEq),
            (">=", TokenKind::GtEq),
            ("//", TokenKind::SlashSlash),
        ];
        for (lit, kind) in TWO_CHAR {
            if self.starts_with(lit) {
                self.advance();
                self.advance();
                return Ok(Token { kind: *kind, text: (*lit).into(), span: self.make_span(start_line, start_col, 2) });
            }
        }

        let c = self.peek().ok_or(LexError::UnexpectedChar { ch: '\0', span: self.make_span(start_line, start_col, 1) })?;
        let kind = match c {
            '=' => TokenKind::Eq,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '!' => TokenKind::Bang,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            other => return Err(LexError::UnexpectedChar { ch: other, span: self.make_span(start_line, start_col, 1) }),
        };
        self.advance();
        Ok(Token { kind, text: c.to_string(), span: self.make_span(start_line, start_col, 1) })
    }
}

/// Scan a complete source text into a token stream, terminated by `Eof`.
pub fn scan(source: &str) -> Result<Vec<Token>, LexError> {
    Scanner::new(source).scan_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        scan(src).expect("scan ok").into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("var del def class method attr if else while return as new"),
            vec![
                TokenKind::Var, TokenKind::Del, TokenKind::Def, TokenKind::Class, TokenKind::Method,
                TokenKind::Attr, TokenKind::If, TokenKind::Else, TokenKind::While, TokenKind::Return,
                TokenKind::As, TokenKind::New, TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_literals() {
        let toks = scan("42 0xFF \"hi\\n\"").expect("scan ok");
        assert_eq!(toks[0].kind, TokenKind::Num);
        assert_eq!(toks[0].text, "42");
        assert_eq!(toks[1].kind, TokenKind::Hex);
        assert_eq!(toks[1].text, "0xFF");
        assert_eq!(toks[2].kind, TokenKind::Str);
        assert_eq!(toks[2].text, "\"hi\\n\"");
    }

    #[test]
    fn test_identifiers() {
        let toks = scan("foo _bar baz2").expect("scan ok");
        assert!(toks[0..3].iter().all(|t| t.kind == TokenKind::Ident));
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("-> == != <= >= // + - * / % ! = < > ( ) { } . , ; :"),
            vec![
                TokenKind::Arrow, TokenKind::EqEq, TokenKind::BangEq, TokenKind::LtEq, TokenKind::GtEq,
                TokenKind::SlashSlash, TokenKind::Plus, TokenKind::Minus, TokenKind::Star, TokenKind::Slash,
                TokenKind::Percent, TokenKind::Bang, TokenKind::Eq, TokenKind::Lt, TokenKind::Gt,
                TokenKind::LParen, TokenKind::RParen, TokenKind::LBrace, TokenKind::RBrace, TokenKind::Dot,
                TokenKind::Comma, TokenKind::Semicolon, TokenKind::Colon, TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_macro_mode_gates_dollar_tokens() {
        assert!(scan("$(").is_err());
        let toks = scan("#macro $( $x:expr )$ => expr : $( $x )$ #endmacro").expect("scan ok");
        assert!(toks.iter().any(|t| t.kind == TokenKind::DollarLParen));
        assert!(toks.iter().any(|t| t.kind == TokenKind::DollarIdent && t.text == "$x"));
        assert!(toks.iter().any(|t| t.kind == TokenKind::FatArrow));
    }

    #[test]
    fn test_span_widths_match_text_length() {
        for tok in scan("foobar 123 \"abc\"").expect("scan ok") {
            if tok.kind == TokenKind::Eof {
                continue;
            }
            assert_eq!(tok.span.end_col - tok.span.start_col, tok.text.chars().count());
        }
    }

    #[test]
    fn test_comment_and_unknown_directive() {
        let toks = scan("# a comment\nvar").expect("scan ok");
        assert_eq!(toks[0].kind, TokenKind::Var);
        assert!(scan("#bogus").is_err());
    }
}
