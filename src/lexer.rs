use crate::loc::Snippet;
use crate::token::{Token, TokenKind, TokenPayload};
use guard::guard;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
#[error("{message}\n{snippet}")]
pub struct LexerError {
    pub message: String,
    pub snippet: Snippet,
}

impl LexerError {
    pub fn from_token(src: &[char], token: &Token) -> LexerError {
        LexerError {
            message: token.text().unwrap_or("invalid token").to_string(),
            snippet: Snippet::at(src, token.offset),
        }
    }
}

/// On-demand scanner. Each call to [`Lexer::next_token`] produces exactly one
/// token; once the input is exhausted it keeps returning `EOF`. Malformed
/// input produces a `ParseError` token instead of failing.
#[derive(Debug)]
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Lexer {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    pub fn source(&self) -> &[char] {
        &self.input
    }

    fn inc_pos(&mut self) {
        if self.pos < self.input.len() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.input.get(self.pos + n).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek();
        self.inc_pos();
        c
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.input[start..end].iter().collect()
    }

    fn error(offset: usize, message: &str) -> Token {
        Token::with_payload(
            TokenKind::ParseError,
            offset,
            TokenPayload::Text(message.to_string()),
        )
    }

    pub fn next_token(&mut self) -> Token {
        while self.peek().map_or(false, char::is_whitespace) {
            self.inc_pos();
        }

        let start = self.pos;
        guard!(let Some(c) = self.next() else {
            return Token::new(TokenKind::EOF, start);
        });

        match c {
            '"' => self.string_literal(start),
            '\'' => self.char_literal(start),
            '0'..='9' => self.numeric_literal(start),
            '.' if self.peek().map_or(false, |c| c.is_ascii_digit()) => {
                self.numeric_literal(start)
            }
            '/' if self.peek() == Some('/') => self.line_comment(start),
            '/' if self.peek() == Some('*') => self.block_comment(start),
            '\\' => Self::error(start, "stray `\\` in program"),
            _ => match self.symbol(start) {
                Some(token) => token,
                None => self.identifier_or_keyword(start),
            },
        }
    }

    /// Collects every token up to and including `EOF`, stopping at the first
    /// scanner diagnostic.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            match token.kind {
                TokenKind::ParseError => return Err(LexerError::from_token(&self.input, &token)),
                TokenKind::EOF => {
                    tokens.push(token);
                    return Ok(tokens);
                }
                _ => tokens.push(token),
            }
        }
    }

    // longest match wins: three, then two, then one character
    fn symbol(&mut self, start: usize) -> Option<Token> {
        for len in (1..=3).rev() {
            guard!(let Some(chars) = self.input.get(start..start + len) else {
                continue;
            });
            let lexeme: String = chars.iter().collect();
            if let Some(kind) = TokenKind::symbol(&lexeme) {
                self.pos = start + len;
                return Some(Token::new(kind, start));
            }
        }
        None
    }

    fn identifier_or_keyword(&mut self, start: usize) -> Token {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || TokenKind::is_symbol_char(c) {
                break;
            }
            self.inc_pos();
        }
        let text = self.text(start, self.pos);
        match TokenKind::keyword(&text) {
            Some(kind) => Token::new(kind, start),
            None => Token::with_payload(TokenKind::Identifier, start, TokenPayload::Text(text)),
        }
    }

    fn string_literal(&mut self, start: usize) -> Token {
        loop {
            match self.next() {
                None => return Self::error(start, "No closing quotation mark before end of file"),
                Some('\n') => return Self::error(start, "No closing quotation mark before newline"),
                Some('\\') => self.inc_pos(),
                Some('"') => break,
                Some(_) => {}
            }
        }
        Token::with_payload(
            TokenKind::StringLiteral,
            start,
            TokenPayload::Text(self.text(start, self.pos)),
        )
    }

    // Escapes are skipped, not decoded: the value is the last character
    // before the closing quote, so '\n' holds 'n'.
    fn char_literal(&mut self, start: usize) -> Token {
        let mut c = self.next();
        if c == Some('\\') {
            c = self.next();
        }
        guard!(let Some(value) = c else {
            return Self::error(start, "No closing quotation mark in char literal");
        });
        if self.next() != Some('\'') {
            return Self::error(start, "No closing quotation mark in char literal");
        }
        Token::with_payload(
            TokenKind::CharLiteral,
            start,
            TokenPayload::Int(value as i64),
        )
    }

    fn numeric_literal(&mut self, start: usize) -> Token {
        let first = self.input[start];
        if first == '0' && matches!(self.peek(), Some('x' | 'X')) {
            self.inc_pos();
            let digits_start = self.pos;
            while self.peek().map_or(false, |c| c.is_ascii_hexdigit()) {
                self.inc_pos();
            }
            let digits = self.text(digits_start, self.pos);
            return match u64::from_str_radix(&digits, 16) {
                Ok(value) => Token::with_payload(
                    TokenKind::IntLiteral,
                    start,
                    TokenPayload::Int(value as i64),
                ),
                Err(_) => Self::error(start, "Invalid hexadecimal literal"),
            };
        }

        let mut is_float = first == '.';
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_digit() => self.inc_pos(),
                Some('.') if !is_float && self.peek_nth(1).map_or(false, |c| c.is_ascii_digit()) => {
                    self.inc_pos();
                    is_float = true;
                }
                _ => break,
            }
        }
        let text = self.text(start, self.pos);
        if matches!(self.peek(), Some('f' | 'F')) {
            self.inc_pos();
            is_float = true;
        }

        if is_float {
            match text.parse::<f32>() {
                Ok(value) => Token::with_payload(
                    TokenKind::FloatLiteral,
                    start,
                    TokenPayload::Float(value),
                ),
                Err(_) => Self::error(start, "Invalid float literal"),
            }
        } else {
            match text.parse::<i64>() {
                Ok(value) => Token::with_payload(
                    TokenKind::IntLiteral,
                    start,
                    TokenPayload::Int(value),
                ),
                Err(_) => Self::error(start, "Integer literal out of range"),
            }
        }
    }

    fn line_comment(&mut self, start: usize) -> Token {
        while self.peek().map_or(false, |c| c != '\n') {
            self.inc_pos();
        }
        Token::with_payload(
            TokenKind::Comment,
            start,
            TokenPayload::Text(self.text(start, self.pos)),
        )
    }

    fn block_comment(&mut self, start: usize) -> Token {
        // skip the opening `*`
        self.inc_pos();
        loop {
            match self.next() {
                None => return Self::error(start, "Unterminated block comment"),
                Some('*') if self.peek() == Some('/') => {
                    self.inc_pos();
                    break;
                }
                Some(_) => {}
            }
        }
        Token::with_payload(
            TokenKind::Comment,
            start,
            TokenPayload::Text(self.text(start, self.pos)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut kinds = Vec::new();
        loop {
            let token = lexer.next_token();
            kinds.push(token.kind);
            if matches!(token.kind, TokenKind::EOF | TokenKind::ParseError) {
                return kinds;
            }
        }
    }

    fn single(src: &str) -> Token {
        Lexer::new(src).next_token()
    }

    #[test]
    fn hex_literal() {
        let token = single("0xFF");
        assert_eq!(token.kind, TokenKind::IntLiteral);
        assert_eq!(token.payload, TokenPayload::Int(255));
        assert_eq!(single("0XfF").payload, TokenPayload::Int(255));
        assert_eq!(single("0xFFFFFFFFFFFFFFFF").payload, TokenPayload::Int(-1));
        assert_eq!(single("0x").kind, TokenKind::ParseError);
    }

    #[test]
    fn float_literals() {
        let token = single("3.14");
        assert_eq!(token.kind, TokenKind::FloatLiteral);
        assert_eq!(token.payload, TokenPayload::Float(3.14));

        let token = single(".5");
        assert_eq!(token.kind, TokenKind::FloatLiteral);
        assert_eq!(token.payload, TokenPayload::Float(0.5));

        let token = single("2f");
        assert_eq!(token.kind, TokenKind::FloatLiteral);
        assert_eq!(token.payload, TokenPayload::Float(2.0));
    }

    #[test]
    fn trailing_dot_is_not_part_of_number() {
        let mut lexer = Lexer::new("3.");
        let int = lexer.next_token();
        assert_eq!(int.kind, TokenKind::IntLiteral);
        assert_eq!(int.payload, TokenPayload::Int(3));
        assert_eq!(lexer.next_token().kind, TokenKind::Dot);
        assert_eq!(lexer.next_token().kind, TokenKind::EOF);
    }

    #[test]
    fn second_decimal_point_starts_new_literal() {
        let mut lexer = Lexer::new("1.2.3");
        assert_eq!(lexer.next_token().payload, TokenPayload::Float(1.2));
        assert_eq!(lexer.next_token().payload, TokenPayload::Float(0.3));
    }

    #[test]
    fn integer_overflow_is_diagnosed() {
        assert_eq!(single("99999999999999999999").kind, TokenKind::ParseError);
    }

    #[test]
    fn unterminated_string_before_newline() {
        let token = single("\"abc\nd\"");
        assert_eq!(token.kind, TokenKind::ParseError);
        assert_eq!(
            token.text(),
            Some("No closing quotation mark before newline")
        );
        assert_eq!(single("\"abc").kind, TokenKind::ParseError);
    }

    #[test]
    fn string_keeps_quotes_and_escapes() {
        let token = single(r#""a \"quoted\" \n""#);
        assert_eq!(token.kind, TokenKind::StringLiteral);
        assert_eq!(token.text(), Some(r#""a \"quoted\" \n""#));
    }

    #[test]
    fn char_literals() {
        assert_eq!(single("'a'").payload, TokenPayload::Int('a' as i64));
        assert_eq!(single(r"'\n'").payload, TokenPayload::Int('n' as i64));
        assert_eq!(single("'ab'").kind, TokenKind::ParseError);
        assert_eq!(single("'a").kind, TokenKind::ParseError);
    }

    #[test]
    fn longest_symbol_wins() {
        use TokenKind::*;
        assert_eq!(kinds("<<="), vec![LeftShiftEquals, EOF]);
        assert_eq!(kinds("<<"), vec![SmallerSmaller, EOF]);
        assert_eq!(kinds("< <"), vec![Smaller, Smaller, EOF]);
        assert_eq!(kinds("a->b"), vec![Identifier, Arrow, Identifier, EOF]);
        assert_eq!(kinds("..."), vec![Ellipsis, EOF]);
        assert_eq!(kinds(".."), vec![Dot, Dot, EOF]);
        assert_eq!(kinds("x+++y"), vec![Identifier, PlusPlus, Plus, Identifier, EOF]);
    }

    #[test]
    fn keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(
            kinds("unsigned int main_1(void)"),
            vec![KeywordUnsigned, KeywordInt, Identifier, OpenParen, KeywordVoid, CloseParen, EOF]
        );
        let token = single("whilex");
        assert_eq!(token.kind, Identifier);
        assert_eq!(token.text(), Some("whilex"));
    }

    #[test]
    fn identifier_stops_at_symbol() {
        let mut lexer = Lexer::new("foo+bar");
        assert_eq!(lexer.next_token().text(), Some("foo"));
        assert_eq!(lexer.next_token().kind, TokenKind::Plus);
        assert_eq!(lexer.next_token().text(), Some("bar"));
    }

    #[test]
    fn comments_are_tokens() {
        use TokenKind::*;
        assert_eq!(kinds("a // rest\nb"), vec![Identifier, Comment, Identifier, EOF]);
        assert_eq!(kinds("a /* x * y */ b"), vec![Identifier, Comment, Identifier, EOF]);
        assert_eq!(kinds("a /* open"), vec![Identifier, ParseError]);
        assert_eq!(single("/* a **/").text(), Some("/* a **/"));
    }

    #[test]
    fn eof_repeats_forever() {
        let mut lexer = Lexer::new("  x ");
        assert_eq!(lexer.next_token().kind, TokenKind::Identifier);
        for _ in 0..3 {
            assert_eq!(lexer.next_token().kind, TokenKind::EOF);
        }
    }

    #[test]
    fn offsets_point_at_token_start() {
        let mut lexer = Lexer::new("int  x;");
        assert_eq!(lexer.next_token().offset, 0);
        assert_eq!(lexer.next_token().offset, 5);
        assert_eq!(lexer.next_token().offset, 6);
    }

    #[test]
    fn tokenize_reports_first_error() {
        let err = Lexer::new("int x = \"oops\n;").tokenize().unwrap_err();
        assert_eq!(err.message, "No closing quotation mark before newline");
        assert_eq!(err.snippet.loc.line, 1);
        assert_eq!(err.snippet.marked, "int x = [\"]oops");

        let tokens = Lexer::new("x;").tokenize().unwrap();
        assert_eq!(tokens.len(), 3);
    }
}
