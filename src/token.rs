use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Character index of the token's first character in the source.
    pub offset: usize,
    pub payload: TokenPayload,
}

impl Token {
    pub fn new(kind: TokenKind, offset: usize) -> Token {
        Token {
            kind,
            offset,
            payload: TokenPayload::None,
        }
    }

    pub fn with_payload(kind: TokenKind, offset: usize, payload: TokenPayload) -> Token {
        Token {
            kind,
            offset,
            payload,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            TokenPayload::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        match &self.payload {
            TokenPayload::None => Ok(()),
            TokenPayload::Text(s) => write!(f, " : {}", s),
            TokenPayload::Int(i) => write!(f, " : {}", i),
            TokenPayload::Float(x) => write!(f, " : {}", x),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenPayload {
    None,
    /// Identifier, string literal (quotes kept), comment, or scanner diagnostic.
    Text(String),
    /// Integer and character literals.
    Int(i64),
    Float(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    StringLiteral,
    IntLiteral,
    FloatLiteral,
    CharLiteral,

    OpenParen,    // (
    CloseParen,   // )
    OpenCurly,    // {
    CloseCurly,   // }
    OpenBracket,  // [
    CloseBracket, // ]

    Semicolon,    // ;
    Colon,        // :
    Dot,          // .
    Ellipsis,     // ...
    Comma,        // ,
    QuestionMark, // ?

    Exclam,       // !
    ExclamEquals, // !=

    Plus,       // +
    PlusPlus,   // ++
    PlusEquals, // +=

    Minus,       // -
    MinusMinus,  // --
    MinusEquals, // -=
    Arrow,       // ->

    Star,       // *
    StarEquals, // *=

    Slash,       // /
    SlashEquals, // /=

    Percent,       // %
    PercentEquals, // %=

    Equals,       // =
    EqualsEquals, // ==

    Smaller,         // <
    SmallerSmaller,  // <<
    SmallerEquals,   // <=
    LeftShiftEquals, // <<=

    Greater,          // >
    GreaterGreater,   // >>
    GreaterEquals,    // >=
    RightShiftEquals, // >>=

    And,       // &
    AndAnd,    // &&
    AndEquals, // &=

    Or,       // |
    OrOr,     // ||
    OrEquals, // |=

    Xor,       // ^
    XorEquals, // ^=

    Not, // ~

    KeywordBreak,
    KeywordCase,
    KeywordChar,
    KeywordConst,
    KeywordContinue,
    KeywordDefault,
    KeywordDo,
    KeywordDouble,
    KeywordElse,
    KeywordEnum,
    KeywordFloat,
    KeywordFor,
    KeywordGoto,
    KeywordIf,
    KeywordInt,
    KeywordLong,
    KeywordReturn,
    KeywordShort,
    KeywordSizeof,
    KeywordStatic,
    KeywordStruct,
    KeywordSwitch,
    KeywordTypedef,
    KeywordUnion,
    KeywordUnsigned,
    KeywordVoid,
    KeywordWhile,

    Comment,
    EOF,
    ParseError,
}

const SYMBOLS: &[(&str, TokenKind)] = &[
    ("(", TokenKind::OpenParen),
    (")", TokenKind::CloseParen),
    ("{", TokenKind::OpenCurly),
    ("}", TokenKind::CloseCurly),
    ("[", TokenKind::OpenBracket),
    ("]", TokenKind::CloseBracket),
    (";", TokenKind::Semicolon),
    (":", TokenKind::Colon),
    (".", TokenKind::Dot),
    (",", TokenKind::Comma),
    ("?", TokenKind::QuestionMark),
    ("!", TokenKind::Exclam),
    ("=", TokenKind::Equals),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("|", TokenKind::Or),
    ("&", TokenKind::And),
    ("~", TokenKind::Not),
    ("^", TokenKind::Xor),
    (">", TokenKind::Greater),
    ("<", TokenKind::Smaller),
    ("++", TokenKind::PlusPlus),
    ("+=", TokenKind::PlusEquals),
    ("--", TokenKind::MinusMinus),
    ("-=", TokenKind::MinusEquals),
    ("->", TokenKind::Arrow),
    ("<<", TokenKind::SmallerSmaller),
    ("<=", TokenKind::SmallerEquals),
    (">>", TokenKind::GreaterGreater),
    (">=", TokenKind::GreaterEquals),
    ("||", TokenKind::OrOr),
    ("|=", TokenKind::OrEquals),
    ("&&", TokenKind::AndAnd),
    ("&=", TokenKind::AndEquals),
    ("==", TokenKind::EqualsEquals),
    ("*=", TokenKind::StarEquals),
    ("/=", TokenKind::SlashEquals),
    ("!=", TokenKind::ExclamEquals),
    ("%=", TokenKind::PercentEquals),
    ("^=", TokenKind::XorEquals),
    ("<<=", TokenKind::LeftShiftEquals),
    (">>=", TokenKind::RightShiftEquals),
    ("...", TokenKind::Ellipsis),
];

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("break", TokenKind::KeywordBreak),
    ("case", TokenKind::KeywordCase),
    ("char", TokenKind::KeywordChar),
    ("const", TokenKind::KeywordConst),
    ("continue", TokenKind::KeywordContinue),
    ("default", TokenKind::KeywordDefault),
    ("do", TokenKind::KeywordDo),
    ("double", TokenKind::KeywordDouble),
    ("else", TokenKind::KeywordElse),
    ("enum", TokenKind::KeywordEnum),
    ("float", TokenKind::KeywordFloat),
    ("for", TokenKind::KeywordFor),
    ("goto", TokenKind::KeywordGoto),
    ("if", TokenKind::KeywordIf),
    ("int", TokenKind::KeywordInt),
    ("long", TokenKind::KeywordLong),
    ("return", TokenKind::KeywordReturn),
    ("short", TokenKind::KeywordShort),
    ("sizeof", TokenKind::KeywordSizeof),
    ("static", TokenKind::KeywordStatic),
    ("struct", TokenKind::KeywordStruct),
    ("switch", TokenKind::KeywordSwitch),
    ("typedef", TokenKind::KeywordTypedef),
    ("union", TokenKind::KeywordUnion),
    ("unsigned", TokenKind::KeywordUnsigned),
    ("void", TokenKind::KeywordVoid),
    ("while", TokenKind::KeywordWhile),
];

impl TokenKind {
    pub fn symbol(lexeme: &str) -> Option<TokenKind> {
        SYMBOLS
            .iter()
            .find(|(s, _)| *s == lexeme)
            .map(|&(_, kind)| kind)
    }

    pub fn keyword(lexeme: &str) -> Option<TokenKind> {
        KEYWORDS
            .iter()
            .find(|(s, _)| *s == lexeme)
            .map(|&(_, kind)| kind)
    }

    /// Characters that end an identifier: every one-character symbol plus the
    /// quote and backslash characters, which never form tokens on their own.
    pub fn is_symbol_char(c: char) -> bool {
        matches!(c, '"' | '\'' | '\\')
            || SYMBOLS
                .iter()
                .any(|(s, _)| s.len() == 1 && s.starts_with(c))
    }

    pub fn lexeme(self) -> Option<&'static str> {
        SYMBOLS
            .iter()
            .chain(KEYWORDS.iter())
            .find(|(_, kind)| *kind == self)
            .map(|&(s, _)| s)
    }

    pub fn is_type_keyword(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            KeywordChar
                | KeywordDouble
                | KeywordFloat
                | KeywordInt
                | KeywordLong
                | KeywordShort
                | KeywordUnsigned
                | KeywordVoid
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.lexeme() {
            Some(lexeme) => write!(f, "`{}`", lexeme),
            None => match self {
                TokenKind::Identifier => write!(f, "identifier"),
                TokenKind::StringLiteral => write!(f, "string literal"),
                TokenKind::IntLiteral => write!(f, "integer literal"),
                TokenKind::FloatLiteral => write!(f, "float literal"),
                TokenKind::CharLiteral => write!(f, "char literal"),
                TokenKind::Comment => write!(f, "comment"),
                TokenKind::EOF => write!(f, "end of file"),
                _ => write!(f, "{:?}", self),
            },
        }
    }
}
