//! Tokenizer for strategy scripts.

use crate::domain::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    Const,
    Var,
    If,
    Else,
    True,
    False,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    Assign,
    AndAnd,
    OrOr,
}

impl Punct {
    pub fn as_str(self) -> &'static str {
        match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Comma => ",",
            Punct::Semicolon => ";",
            Punct::Colon => ":",
            Punct::Dot => ".",
            Punct::Question => "?",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::Bang => "!",
            Punct::Lt => "<",
            Punct::Le => "<=",
            Punct::Gt => ">",
            Punct::Ge => ">=",
            Punct::EqEq => "==",
            Punct::NotEq => "!=",
            Punct::Assign => "=",
            Punct::AndAnd => "&&",
            Punct::OrOr => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Str(s) => format!("string \"{s}\""),
            TokenKind::Ident(name) => format!("'{name}'"),
            TokenKind::Keyword(k) => format!("'{}'", keyword_str(*k)),
            TokenKind::Punct(p) => format!("'{}'", p.as_str()),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token's first character.
    pub position: usize,
}

fn keyword(word: &str) -> Option<Keyword> {
    Some(match word {
        "let" => Keyword::Let,
        "const" => Keyword::Const,
        "var" => Keyword::Var,
        "if" => Keyword::If,
        "else" => Keyword::Else,
        "true" => Keyword::True,
        "false" => Keyword::False,
        "null" | "undefined" => Keyword::Null,
        _ => return None,
    })
}

fn keyword_str(k: Keyword) -> &'static str {
    match k {
        Keyword::Let => "let",
        Keyword::Const => "const",
        Keyword::Var => "var",
        Keyword::If => "if",
        Keyword::Else => "else",
        Keyword::True => "true",
        Keyword::False => "false",
        Keyword::Null => "null",
    }
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.remaining().chars().nth(1)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn error(&self, message: impl Into<String>, position: usize) -> ParseError {
        ParseError {
            message: message.into(),
            position,
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.peek(), self.peek_second()) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.advance() {
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.pos;
                    self.pos += 2;
                    match self.remaining().find("*/") {
                        Some(end) => self.pos += end + 2,
                        None => return Err(self.error("unterminated block comment", start)),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn number(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        let mut seen_dot = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.' && !seen_dot {
                seen_dot = true;
                self.advance();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            self.advance();
            if matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("invalid number: {text}"), start))
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => return Err(self.error("unterminated string", start)),
                Some(ch) if ch == quote => return Ok(TokenKind::Str(out)),
                Some('\\') => match self.advance() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some(other) => {
                        return Err(self.error(
                            format!("unsupported escape '\\{other}'"),
                            self.pos - other.len_utf8() - 1,
                        ));
                    }
                    None => return Err(self.error("unterminated string", start)),
                },
                Some(ch) => out.push(ch),
            }
        }
    }

    fn word(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '$') {
            self.advance();
        }
        let word = &self.input[start..self.pos];
        match keyword(word) {
            Some(k) => TokenKind::Keyword(k),
            None => TokenKind::Ident(word.to_string()),
        }
    }

    fn punct(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        let rest = self.remaining();
        let table: [(&str, Punct); 26] = [
            ("===", Punct::EqEq),
            ("!==", Punct::NotEq),
            ("==", Punct::EqEq),
            ("!=", Punct::NotEq),
            ("<=", Punct::Le),
            (">=", Punct::Ge),
            ("&&", Punct::AndAnd),
            ("||", Punct::OrOr),
            ("(", Punct::LParen),
            (")", Punct::RParen),
            ("{", Punct::LBrace),
            ("}", Punct::RBrace),
            ("[", Punct::LBracket),
            ("]", Punct::RBracket),
            (",", Punct::Comma),
            (";", Punct::Semicolon),
            (":", Punct::Colon),
            (".", Punct::Dot),
            ("?", Punct::Question),
            ("+", Punct::Plus),
            ("-", Punct::Minus),
            ("*", Punct::Star),
            ("/", Punct::Slash),
            ("%", Punct::Percent),
            ("!", Punct::Bang),
            ("=", Punct::Assign),
        ];
        for (text, punct) in table {
            if rest.starts_with(text) {
                self.pos += text.len();
                return Ok(TokenKind::Punct(punct));
            }
        }
        match rest.chars().next() {
            Some('<') => {
                self.pos += 1;
                Ok(TokenKind::Punct(Punct::Lt))
            }
            Some('>') => {
                self.pos += 1;
                Ok(TokenKind::Punct(Punct::Gt))
            }
            Some('`') => Err(self.error("template literals are not supported", start)),
            Some(ch) => Err(self.error(format!("unexpected character '{ch}'"), start)),
            None => Err(self.error("unexpected end of input", start)),
        }
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer { input, pos: 0 };
    let mut tokens = Vec::new();

    loop {
        lexer.skip_trivia()?;
        let position = lexer.pos;
        let kind = match lexer.peek() {
            None => {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    position,
                });
                return Ok(tokens);
            }
            Some(ch) if ch.is_ascii_digit() => lexer.number()?,
            Some('.') if matches!(lexer.peek_second(), Some(c) if c.is_ascii_digit()) => {
                lexer.number()?
            }
            Some(q @ ('"' | '\'')) => lexer.string(q)?,
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' || ch == '$' => lexer.word(),
            Some(_) => lexer.punct()?,
        };
        tokens.push(Token { kind, position });
    }
}
