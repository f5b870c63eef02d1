//! The lexer.
//!
//! The lexer is pull-based and carries two lexicons. In *expression* mode the
//! usual scripting-language tokenization applies. In *command-word* mode most
//! operators lose their meaning and long runs of characters are folded into
//! word pieces, broken only by shell metacharacters. The parser decides which
//! lexicon to pull from, and may rewind the lexer to a previously saved
//! checkpoint when a tentative classification turns out to be wrong.

use crate::error::LexError;
use crate::token::{keyword_kind, SourcePosition, Token, TokenKind, TokenValue};

const END_OF_INPUT: char = '\0';

/// A saved lexer state; see [`Lexer::checkpoint`] and [`Lexer::rewind`].
#[derive(Clone, Copy, Debug)]
pub struct LexerCheckpoint {
    cursor: usize,
    line: u32,
    column: u32,
    in_double_quote: bool,
    error_count: usize,
}

/// Scans source text into tokens.
pub struct Lexer {
    chars: Vec<char>,
    cursor: usize,
    line: u32,
    column: u32,
    start_pos: SourcePosition,
    /// True while command-word lexing is inside an open double quote.
    in_double_quote: bool,
    errors: Vec<LexError>,
}

impl Lexer {
    /// Returns a new lexer over the given source text.
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            cursor: 0,
            line: 1,
            column: 1,
            start_pos: SourcePosition::new(1, 1),
            in_double_quote: false,
            errors: vec![],
        }
    }

    /// Returns the number of errors recorded so far.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the recorded errors.
    pub fn errors(&self) -> &[LexError] {
        &self.errors
    }

    /// Returns true while command-word lexing is inside an open double
    /// quote; substitutions pulled in that state must not be field-split.
    pub fn in_double_quote(&self) -> bool {
        self.in_double_quote
    }

    /// Saves the current lexer state.
    pub fn checkpoint(&self) -> LexerCheckpoint {
        LexerCheckpoint {
            cursor: self.cursor,
            line: self.line,
            column: self.column,
            in_double_quote: self.in_double_quote,
            error_count: self.errors.len(),
        }
    }

    /// Restores a previously saved state, discarding errors recorded since.
    pub fn rewind(&mut self, checkpoint: LexerCheckpoint) {
        self.cursor = checkpoint.cursor;
        self.line = checkpoint.line;
        self.column = checkpoint.column;
        self.in_double_quote = checkpoint.in_double_quote;
        self.errors.truncate(checkpoint.error_count);
    }

    fn current(&self) -> char {
        self.chars.get(self.cursor).copied().unwrap_or(END_OF_INPUT)
    }

    fn peek_ahead(&self) -> char {
        self.chars
            .get(self.cursor + 1)
            .copied()
            .unwrap_or(END_OF_INPUT)
    }

    fn peek_at(&self, offset: usize) -> char {
        self.chars
            .get(self.cursor + offset)
            .copied()
            .unwrap_or(END_OF_INPUT)
    }

    fn advance(&mut self) {
        if let Some(c) = self.chars.get(self.cursor) {
            if *c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.cursor += 1;
        }
    }

    fn at_end(&self) -> bool {
        self.cursor >= self.chars.len()
    }

    fn is_blank(c: char) -> bool {
        c == ' ' || c == '\t'
    }

    fn mark_start(&mut self) {
        self.start_pos = SourcePosition::new(self.line, self.column);
    }

    fn record(&mut self, err: LexError) {
        self.errors.push(err);
    }

    fn finish(&self, kind: TokenKind) -> Token {
        let mut tok = Token::new(kind, self.start_pos);
        tok.blank_after = Self::is_blank(self.current());
        tok
    }

    fn finish_with(&self, kind: TokenKind, value: TokenValue) -> Token {
        let mut tok = Token::with_value(kind, value, self.start_pos);
        tok.blank_after = Self::is_blank(self.current());
        tok
    }

    /// Consumes the current character and returns a token of `kind`.
    fn select(&mut self, kind: TokenKind) -> Token {
        self.advance();
        self.finish(kind)
    }

    /// Consumes two characters and returns a token of `kind`.
    fn select2(&mut self, kind: TokenKind) -> Token {
        self.advance();
        self.advance();
        self.finish(kind)
    }

    fn select3(&mut self, kind: TokenKind) -> Token {
        self.advance();
        self.advance();
        self.advance();
        self.finish(kind)
    }

    /// Skips insignificant characters: blanks, comments, and escaped
    /// newlines. Does not skip unescaped newlines.
    fn skip_insignificant(&mut self) {
        loop {
            let c = self.current();
            if Self::is_blank(c) || c == '\r' {
                self.advance();
            } else if c == '\\' && self.peek_ahead() == '\n' {
                self.advance();
                self.advance();
            } else if c == '#' {
                while !self.at_end() && self.current() != '\n' {
                    self.advance();
                }
            } else {
                return;
            }
        }
    }

    /// Produces the next token in the expression lexicon.
    #[allow(clippy::too_many_lines)]
    pub fn next_token(&mut self) -> Token {
        loop {
            self.skip_insignificant();
            self.mark_start();

            let c = self.current();
            let token = match c {
                END_OF_INPUT if self.at_end() => Token::new(TokenKind::Eof, self.start_pos),
                '\n' => self.select(TokenKind::NewLine),
                '(' => self.select(TokenKind::LParen),
                ')' => self.select(TokenKind::RParen),
                '{' => self.select(TokenKind::LBrace),
                '}' => self.select(TokenKind::RBrace),
                '[' => self.select(TokenKind::LBracket),
                ']' => self.select(TokenKind::RBracket),
                ',' => self.select(TokenKind::Comma),
                ':' => self.select(TokenKind::Colon),
                ';' => self.select(TokenKind::Semicolon),
                '?' => self.select(TokenKind::Question),
                '~' => self.select(TokenKind::BitNot),
                '.' => {
                    if self.peek_ahead() == '.' {
                        if self.peek_at(2) == '.' {
                            self.select3(TokenKind::Ellipsis)
                        } else {
                            self.select2(TokenKind::DotDot)
                        }
                    } else {
                        self.select(TokenKind::Dot)
                    }
                }
                '+' => match self.peek_ahead() {
                    '=' => self.select2(TokenKind::PlusAssign),
                    _ => self.select(TokenKind::Plus),
                },
                '-' => match self.peek_ahead() {
                    '=' => self.select2(TokenKind::MinusAssign),
                    '>' => self.select2(TokenKind::Arrow),
                    _ => self.select(TokenKind::Minus),
                },
                '*' => match self.peek_ahead() {
                    '=' => self.select2(TokenKind::StarAssign),
                    '*' => self.select2(TokenKind::StarStar),
                    _ => self.select(TokenKind::Star),
                },
                '/' => match self.peek_ahead() {
                    '=' => self.select2(TokenKind::SlashAssign),
                    _ => self.select(TokenKind::Slash),
                },
                '%' => match self.peek_ahead() {
                    '=' => self.select2(TokenKind::PercentAssign),
                    _ => self.select(TokenKind::Percent),
                },
                '=' => match self.peek_ahead() {
                    '=' => self.select2(TokenKind::Equal),
                    _ => self.select(TokenKind::Assign),
                },
                '!' => match self.peek_ahead() {
                    '=' => self.select2(TokenKind::NotEqual),
                    _ => self.select(TokenKind::Not),
                },
                '<' => match self.peek_ahead() {
                    '<' => {
                        if self.peek_at(2) == '<' {
                            self.select3(TokenKind::HereString)
                        } else {
                            self.select2(TokenKind::Shl)
                        }
                    }
                    '=' => self.select2(TokenKind::LessEqual),
                    '-' => self.select2(TokenKind::LeftArrow),
                    _ => self.select(TokenKind::Less),
                },
                '>' => match self.peek_ahead() {
                    '>' => self.select2(TokenKind::Shr),
                    '=' => self.select2(TokenKind::GreaterEqual),
                    _ => self.select(TokenKind::Greater),
                },
                '&' => match self.peek_ahead() {
                    '&' => self.select2(TokenKind::AndAnd),
                    '=' => self.select2(TokenKind::AndAssign),
                    '>' => self.select2(TokenKind::AmpGreater),
                    _ => self.select(TokenKind::BitAnd),
                },
                '|' => match self.peek_ahead() {
                    '|' => self.select2(TokenKind::OrOr),
                    '=' => self.select2(TokenKind::OrAssign),
                    '&' => self.select2(TokenKind::PipeAnd),
                    _ => self.select(TokenKind::BitOr),
                },
                '^' => match self.peek_ahead() {
                    '=' => self.select2(TokenKind::XorAssign),
                    _ => self.select(TokenKind::BitXor),
                },
                '$' => match self.peek_ahead() {
                    '(' => self.select2(TokenKind::DollarParen),
                    '{' => self.select2(TokenKind::DollarBrace),
                    _ => {
                        self.record(LexError::StrayChar(self.start_pos, c));
                        self.advance();
                        continue;
                    }
                },
                '"' | '\'' => self.scan_string(c),
                c if c.is_ascii_digit() => self.scan_number(),
                c if c.is_alphabetic() || c == '_' => self.scan_identifier(),
                _ => {
                    self.record(LexError::StrayChar(self.start_pos, c));
                    self.advance();
                    continue;
                }
            };

            return token;
        }
    }

    fn scan_identifier(&mut self) -> Token {
        let mut name = String::new();
        while self.current().is_alphanumeric() || self.current() == '_' {
            name.push(self.current());
            self.advance();
        }

        if let Some(kind) = keyword_kind(&name) {
            self.finish(kind)
        } else {
            self.finish_with(TokenKind::Identifier, TokenValue::Identifier(name))
        }
    }

    fn scan_number(&mut self) -> Token {
        let mut text = String::new();

        // Radix prefixes.
        if self.current() == '0' {
            let radix = match self.peek_ahead() {
                'x' | 'X' => Some(16),
                'o' | 'O' => Some(8),
                'b' | 'B' => Some(2),
                _ => None,
            };

            if let Some(radix) = radix {
                self.advance();
                self.advance();
                while self.current().is_ascii_alphanumeric() {
                    text.push(self.current());
                    self.advance();
                }

                return match i64::from_str_radix(&text, radix) {
                    Ok(n) => {
                        self.finish_with(TokenKind::IntLiteral, TokenValue::Integer(n))
                    }
                    Err(_) => {
                        self.record(LexError::MalformedNumber(self.start_pos));
                        self.finish_with(TokenKind::IntLiteral, TokenValue::Integer(0))
                    }
                };
            }
        }

        while self.current().is_ascii_digit() {
            text.push(self.current());
            self.advance();
        }

        let mut is_real = false;

        // A '.' only continues the number when followed by a digit; `1..5`
        // keeps the range operator intact.
        if self.current() == '.' && self.peek_ahead().is_ascii_digit() {
            is_real = true;
            text.push('.');
            self.advance();
            while self.current().is_ascii_digit() {
                text.push(self.current());
                self.advance();
            }
        }

        if self.current() == 'e' || self.current() == 'E' {
            let next = self.peek_ahead();
            if next.is_ascii_digit()
                || ((next == '+' || next == '-') && self.peek_at(2).is_ascii_digit())
            {
                is_real = true;
                text.push('e');
                self.advance();
                if self.current() == '+' || self.current() == '-' {
                    text.push(self.current());
                    self.advance();
                }
                while self.current().is_ascii_digit() {
                    text.push(self.current());
                    self.advance();
                }
            }
        }

        if is_real {
            match text.parse::<f64>() {
                Ok(v) => self.finish_with(TokenKind::RealLiteral, TokenValue::Real(v)),
                Err(_) => {
                    self.record(LexError::MalformedNumber(self.start_pos));
                    self.finish_with(TokenKind::RealLiteral, TokenValue::Real(0.0))
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => self.finish_with(TokenKind::IntLiteral, TokenValue::Integer(n)),
                Err(_) => {
                    self.record(LexError::MalformedNumber(self.start_pos));
                    self.finish_with(TokenKind::IntLiteral, TokenValue::Integer(0))
                }
            }
        }
    }

    fn scan_string(&mut self, quote: char) -> Token {
        self.advance();

        let mut text = String::new();
        loop {
            match self.current() {
                END_OF_INPUT if self.at_end() => {
                    self.record(LexError::UnterminatedString(self.start_pos));
                    break;
                }
                c if c == quote => {
                    self.advance();
                    break;
                }
                '\\' => {
                    self.advance();
                    if let Some(c) = self.scan_escape() {
                        text.push(c);
                    }
                }
                c => {
                    text.push(c);
                    self.advance();
                }
            }
        }

        self.finish_with(TokenKind::StringLiteral, TokenValue::Str(text))
    }

    fn scan_escape(&mut self) -> Option<char> {
        let c = self.current();
        let resolved = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            'x' => {
                self.advance();
                let hi = self.current();
                self.advance();
                let lo = self.current();
                self.advance();
                let code = hi
                    .to_digit(16)
                    .zip(lo.to_digit(16))
                    .map(|(h, l)| h * 16 + l);
                return match code.and_then(char::from_u32) {
                    Some(c) => Some(c),
                    None => {
                        self.record(LexError::InvalidEscape(
                            SourcePosition::new(self.line, self.column),
                            'x',
                        ));
                        None
                    }
                };
            }
            END_OF_INPUT if self.at_end() => {
                self.record(LexError::UnterminatedString(self.start_pos));
                return None;
            }
            other => {
                self.record(LexError::InvalidEscape(
                    SourcePosition::new(self.line, self.column),
                    other,
                ));
                self.advance();
                return None;
            }
        };

        self.advance();
        Some(resolved)
    }

    /// Produces the next token in the command-word lexicon.
    ///
    /// Word runs are broken only by unquoted whitespace, the shell
    /// metacharacters (`| & ; ( ) < >`), `$`, quotes, newline, and the end of
    /// input. Double quotes may span several returned pieces when they
    /// contain `$`-interpolations; the pieces are glued back together by the
    /// parser using the blank-after flags.
    pub fn next_cmd_token(&mut self) -> Token {
        if self.in_double_quote {
            return self.next_in_double_quote();
        }

        loop {
            let c = self.current();
            if Self::is_blank(c) || c == '\r' {
                self.advance();
            } else if c == '\\' && self.peek_ahead() == '\n' {
                self.advance();
                self.advance();
            } else if c == '#' {
                while !self.at_end() && self.current() != '\n' {
                    self.advance();
                }
            } else {
                break;
            }
        }

        self.mark_start();

        match self.current() {
            END_OF_INPUT if self.at_end() => Token::new(TokenKind::Eof, self.start_pos),
            '\n' => self.select(TokenKind::NewLine),
            ';' => self.select(TokenKind::Semicolon),
            '(' => self.select(TokenKind::LParen),
            ')' => self.select(TokenKind::RParen),
            '}' => self.select(TokenKind::RBrace),
            '{' => self.select(TokenKind::LBrace),
            '|' => match self.peek_ahead() {
                '|' => self.select2(TokenKind::OrOr),
                '&' => self.select2(TokenKind::PipeAnd),
                _ => self.select(TokenKind::BitOr),
            },
            '&' => match self.peek_ahead() {
                '&' => self.select2(TokenKind::AndAnd),
                '>' => self.select2(TokenKind::AmpGreater),
                _ => self.select(TokenKind::BitAnd),
            },
            '<' => {
                if self.peek_ahead() == '<' && self.peek_at(2) == '<' {
                    self.select3(TokenKind::HereString)
                } else {
                    self.select(TokenKind::Less)
                }
            }
            '>' => match self.peek_ahead() {
                '>' => self.select2(TokenKind::Shr),
                _ => self.select(TokenKind::Greater),
            },
            '$' => self.scan_dollar(),
            '\'' => self.scan_string('\''),
            '"' => {
                self.advance();
                self.in_double_quote = true;
                self.next_in_double_quote()
            }
            _ => self.scan_word(),
        }
    }

    fn scan_dollar(&mut self) -> Token {
        match self.peek_ahead() {
            '(' => self.select2(TokenKind::DollarParen),
            '{' => self.select2(TokenKind::DollarBrace),
            c if c.is_alphabetic() || c == '_' => {
                self.advance();
                let mut name = String::new();
                while self.current().is_alphanumeric() || self.current() == '_' {
                    name.push(self.current());
                    self.advance();
                }
                self.finish_with(TokenKind::Variable, TokenValue::Identifier(name))
            }
            _ => {
                // A lone '$' is an ordinary word character.
                self.scan_word()
            }
        }
    }

    fn scan_word(&mut self) -> Token {
        let mut text = String::new();

        // A leading '$' that did not introduce an interpolation.
        if self.current() == '$' {
            text.push('$');
            self.advance();
        }

        loop {
            let c = self.current();
            match c {
                END_OF_INPUT if self.at_end() => break,
                ' ' | '\t' | '\r' | '\n' | '|' | '&' | ';' | '(' | ')' | '<' | '>' | '$'
                | '"' | '\'' | '}' => break,
                '\\' => {
                    self.advance();
                    if self.at_end() {
                        break;
                    }
                    if self.current() == '\n' {
                        self.advance();
                    } else {
                        text.push(self.current());
                        self.advance();
                    }
                }
                c => {
                    text.push(c);
                    self.advance();
                }
            }
        }

        self.finish_with(TokenKind::Word, TokenValue::Str(text))
    }

    fn next_in_double_quote(&mut self) -> Token {
        self.mark_start();

        if self.current() == '$' {
            let next = self.peek_ahead();
            if next == '(' {
                return self.select2(TokenKind::DollarParen);
            }
            if next == '{' {
                return self.select2(TokenKind::DollarBrace);
            }
            if next.is_alphabetic() || next == '_' {
                // Inside quotes nothing splits words, whatever follows.
                let mut tok = self.scan_dollar();
                tok.blank_after = false;
                return tok;
            }
        }

        let mut text = String::new();
        loop {
            match self.current() {
                END_OF_INPUT if self.at_end() => {
                    self.record(LexError::UnterminatedString(self.start_pos));
                    self.in_double_quote = false;
                    break;
                }
                '"' => {
                    self.advance();
                    self.in_double_quote = false;
                    break;
                }
                '$' => {
                    let next = self.peek_ahead();
                    if next == '(' || next == '{' || next.is_alphabetic() || next == '_' {
                        // Escaped dollars were consumed above; this one
                        // starts an interpolation on the next pull.
                        let mut tok = Token::with_value(
                            TokenKind::StringLiteral,
                            TokenValue::Str(text),
                            self.start_pos,
                        );
                        tok.blank_after = false;
                        return tok;
                    }
                    text.push('$');
                    self.advance();
                }
                '\\' => {
                    self.advance();
                    match self.current() {
                        '$' => {
                            text.push('$');
                            self.advance();
                        }
                        '"' => {
                            text.push('"');
                            self.advance();
                        }
                        '\\' => {
                            text.push('\\');
                            self.advance();
                        }
                        'n' => {
                            text.push('\n');
                            self.advance();
                        }
                        't' => {
                            text.push('\t');
                            self.advance();
                        }
                        _ => text.push('\\'),
                    }
                }
                c => {
                    text.push(c);
                    self.advance();
                }
            }
        }

        self.finish_with(TokenKind::StringLiteral, TokenValue::Str(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = vec![];
        loop {
            let tok = lexer.next_token();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn lex_simple_expression() {
        assert_eq!(
            kinds("x = a / b"),
            vec![
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Identifier,
                TokenKind::Slash,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_keywords() {
        assert_eq!(
            kinds("func if else while for in"),
            vec![
                TokenKind::KwFunc,
                TokenKind::KwIf,
                TokenKind::KwElse,
                TokenKind::KwWhile,
                TokenKind::KwFor,
                TokenKind::KwIn,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_multi_char_operators() {
        assert_eq!(
            kinds("== != <= >= && || << >> ** .. -> <- +="),
            vec![
                TokenKind::Equal,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::StarStar,
                TokenKind::DotDot,
                TokenKind::Arrow,
                TokenKind::LeftArrow,
                TokenKind::PlusAssign,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn blank_after_distinguishes_division_from_word() {
        let mut lexer = Lexer::new("a/b c");
        let a = lexer.next_token();
        assert_eq!(a.kind, TokenKind::Identifier);
        assert!(!a.blank_after);

        let slash = lexer.next_token();
        assert_eq!(slash.kind, TokenKind::Slash);
        assert!(!slash.blank_after);

        let b = lexer.next_token();
        assert_eq!(b.kind, TokenKind::Identifier);
        assert!(b.blank_after);
    }

    #[test]
    fn positions_are_one_indexed() {
        let mut lexer = Lexer::new("x\n  y");
        let x = lexer.next_token();
        assert_eq!(x.pos, SourcePosition::new(1, 1));
        let nl = lexer.next_token();
        assert_eq!(nl.kind, TokenKind::NewLine);
        let y = lexer.next_token();
        assert_eq!(y.pos, SourcePosition::new(2, 3));
    }

    #[test]
    fn lex_number_literals() {
        let mut lexer = Lexer::new("42 3.25 1e3 0x1f 0b101 0o17");
        assert_eq!(lexer.next_token().value, TokenValue::Integer(42));
        assert_eq!(lexer.next_token().value, TokenValue::Real(3.25));
        assert_eq!(lexer.next_token().value, TokenValue::Real(1000.0));
        assert_eq!(lexer.next_token().value, TokenValue::Integer(31));
        assert_eq!(lexer.next_token().value, TokenValue::Integer(5));
        assert_eq!(lexer.next_token().value, TokenValue::Integer(15));
    }

    #[test]
    fn range_does_not_eat_dots() {
        let mut lexer = Lexer::new("1..5");
        assert_eq!(lexer.next_token().value, TokenValue::Integer(1));
        assert_eq!(lexer.next_token().kind, TokenKind::DotDot);
        assert_eq!(lexer.next_token().value, TokenValue::Integer(5));
    }

    #[test]
    fn lex_string_escapes() {
        let mut lexer = Lexer::new(r#""a\tb\n" '\x41'"#);
        assert_eq!(
            lexer.next_token().value,
            TokenValue::Str(String::from("a\tb\n"))
        );
        assert_eq!(lexer.next_token().value, TokenValue::Str(String::from("A")));
    }

    #[test]
    fn unterminated_string_is_recorded_and_incomplete() {
        let mut lexer = Lexer::new("\"abc");
        let tok = lexer.next_token();
        assert_eq!(tok.kind, TokenKind::StringLiteral);
        assert_eq!(lexer.error_count(), 1);
        assert!(lexer.errors()[0].is_incomplete());
    }

    #[test]
    fn stray_char_is_skipped_and_lexing_continues() {
        let mut lexer = Lexer::new("a @ b");
        assert_eq!(lexer.next_token().kind, TokenKind::Identifier);
        assert_eq!(lexer.next_token().kind, TokenKind::Identifier);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert_eq!(lexer.error_count(), 1);
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("a # comment ; x\nb"),
            vec![
                TokenKind::Identifier,
                TokenKind::NewLine,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn cmd_mode_folds_operators_into_words() {
        let mut lexer = Lexer::new("ls -la a/b");
        let ls = lexer.next_cmd_token();
        assert_eq!(ls.kind, TokenKind::Word);
        assert_eq!(ls.text(), "ls");
        assert!(ls.blank_after);

        let flag = lexer.next_cmd_token();
        assert_eq!(flag.text(), "-la");

        let path = lexer.next_cmd_token();
        assert_eq!(path.text(), "a/b");
        assert_eq!(lexer.next_cmd_token().kind, TokenKind::Eof);
    }

    #[test]
    fn cmd_mode_breaks_on_metacharacters() {
        let mut lexer = Lexer::new("echo foo|wc");
        assert_eq!(lexer.next_cmd_token().text(), "echo");
        let foo = lexer.next_cmd_token();
        assert_eq!(foo.text(), "foo");
        assert!(!foo.blank_after);
        assert_eq!(lexer.next_cmd_token().kind, TokenKind::BitOr);
        assert_eq!(lexer.next_cmd_token().text(), "wc");
    }

    #[test]
    fn cmd_mode_lexes_redirection_operators() {
        let mut lexer = Lexer::new("2> err.log >> out &> both <<< hi");
        assert_eq!(lexer.next_cmd_token().text(), "2");
        assert_eq!(lexer.next_cmd_token().kind, TokenKind::Greater);
        assert_eq!(lexer.next_cmd_token().text(), "err.log");
        assert_eq!(lexer.next_cmd_token().kind, TokenKind::Shr);
        assert_eq!(lexer.next_cmd_token().text(), "out");
        assert_eq!(lexer.next_cmd_token().kind, TokenKind::AmpGreater);
        assert_eq!(lexer.next_cmd_token().text(), "both");
        assert_eq!(lexer.next_cmd_token().kind, TokenKind::HereString);
        assert_eq!(lexer.next_cmd_token().text(), "hi");
    }

    #[test]
    fn cmd_mode_variable_references() {
        let mut lexer = Lexer::new("echo $name tail");
        assert_eq!(lexer.next_cmd_token().text(), "echo");
        let var = lexer.next_cmd_token();
        assert_eq!(var.kind, TokenKind::Variable);
        assert_eq!(var.text(), "name");
        assert!(var.blank_after);
        assert_eq!(lexer.next_cmd_token().text(), "tail");
    }

    #[test]
    fn cmd_mode_double_quotes_interpolate() {
        let mut lexer = Lexer::new(r#"echo "pre $x post""#);
        assert_eq!(lexer.next_cmd_token().text(), "echo");

        let pre = lexer.next_cmd_token();
        assert_eq!(pre.kind, TokenKind::StringLiteral);
        assert_eq!(pre.text(), "pre ");
        assert!(!pre.blank_after);

        let var = lexer.next_cmd_token();
        assert_eq!(var.kind, TokenKind::Variable);
        assert_eq!(var.text(), "x");
        assert!(!var.blank_after);

        let post = lexer.next_cmd_token();
        assert_eq!(post.kind, TokenKind::StringLiteral);
        assert_eq!(post.text(), " post");
        assert_eq!(lexer.next_cmd_token().kind, TokenKind::Eof);
    }

    #[test]
    fn cmd_mode_escaped_dollar_is_literal() {
        let mut lexer = Lexer::new(r#"echo "\$HOME""#);
        assert_eq!(lexer.next_cmd_token().text(), "echo");
        assert_eq!(lexer.next_cmd_token().text(), "$HOME");
    }

    #[test]
    fn cmd_mode_command_substitution_openers() {
        let mut lexer = Lexer::new("echo $(pwd) ${x + 1}");
        assert_eq!(lexer.next_cmd_token().text(), "echo");
        assert_eq!(lexer.next_cmd_token().kind, TokenKind::DollarParen);
        assert_eq!(lexer.next_cmd_token().text(), "pwd");
        assert_eq!(lexer.next_cmd_token().kind, TokenKind::RParen);
        assert_eq!(lexer.next_cmd_token().kind, TokenKind::DollarBrace);
        // The interpolated expression itself is pulled in expression mode.
        assert_eq!(lexer.next_token().kind, TokenKind::Identifier);
        assert_eq!(lexer.next_token().kind, TokenKind::Plus);
        assert_eq!(lexer.next_token().kind, TokenKind::IntLiteral);
        assert_eq!(lexer.next_token().kind, TokenKind::RBrace);
    }

    #[test]
    fn checkpoint_rewind_restores_state() {
        let mut lexer = Lexer::new("ls -la");
        let ckpt = lexer.checkpoint();
        assert_eq!(lexer.next_token().kind, TokenKind::Identifier);
        assert_eq!(lexer.next_token().kind, TokenKind::Minus);
        lexer.rewind(ckpt);
        assert_eq!(lexer.next_cmd_token().text(), "ls");
        assert_eq!(lexer.next_cmd_token().text(), "-la");
    }

    #[test]
    fn line_continuation_joins_lines() {
        assert_eq!(
            kinds("a \\\n b"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Eof]
        );
    }
}
