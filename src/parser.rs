use crate::ast::{
    BaseType, DataType, Expr, ExprCall, ExprInfix, ExprPostfix, ExprPrefix, ExprTernary, InfixOp,
    Param, PostfixOp, PrefixOp, ProcDef, ProcSig, Stmt, StmtDo, StmtFor, StmtIf, StmtWhile,
    TopLevel, TranslationUnit, VarDecl,
};
use crate::lexer::Lexer;
use crate::loc::Snippet;
use crate::token::{Token, TokenKind, TokenPayload};
use guard::guard;
use log::debug;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("Expected {expected}, got {found}\n{snippet}")]
    UnexpectedToken {
        expected: String,
        found: TokenKind,
        snippet: Snippet,
    },
    #[error("{message}\n{snippet}")]
    Lexical { message: String, snippet: Snippet },
}

const PREFIX_BP: u8 = 27;
const POSTFIX_BP: u8 = 28;
const TERNARY_BP: (u8, u8) = (6, 5);

fn infix_binding_power(kind: TokenKind) -> Option<(InfixOp, u8, u8)> {
    use TokenKind::*;
    let entry = match kind {
        Comma => (InfixOp::Comma, 1, 2),
        Equals => (InfixOp::Assign, 4, 3),
        PlusEquals => (InfixOp::AddAssign, 4, 3),
        MinusEquals => (InfixOp::SubAssign, 4, 3),
        StarEquals => (InfixOp::MulAssign, 4, 3),
        SlashEquals => (InfixOp::DivAssign, 4, 3),
        PercentEquals => (InfixOp::ModAssign, 4, 3),
        LeftShiftEquals => (InfixOp::ShlAssign, 4, 3),
        RightShiftEquals => (InfixOp::ShrAssign, 4, 3),
        AndEquals => (InfixOp::AndAssign, 4, 3),
        OrEquals => (InfixOp::OrAssign, 4, 3),
        XorEquals => (InfixOp::XorAssign, 4, 3),
        OrOr => (InfixOp::LogicalOr, 7, 8),
        AndAnd => (InfixOp::LogicalAnd, 9, 10),
        Or => (InfixOp::BitOr, 11, 12),
        Xor => (InfixOp::BitXor, 13, 14),
        And => (InfixOp::BitAnd, 15, 16),
        EqualsEquals => (InfixOp::Eq, 17, 18),
        ExclamEquals => (InfixOp::Ne, 17, 18),
        Smaller => (InfixOp::Lt, 19, 20),
        SmallerEquals => (InfixOp::Le, 19, 20),
        Greater => (InfixOp::Gt, 19, 20),
        GreaterEquals => (InfixOp::Ge, 19, 20),
        SmallerSmaller => (InfixOp::Shl, 21, 22),
        GreaterGreater => (InfixOp::Shr, 21, 22),
        Plus => (InfixOp::Add, 23, 24),
        Minus => (InfixOp::Sub, 23, 24),
        Star => (InfixOp::Mul, 25, 26),
        Slash => (InfixOp::Div, 25, 26),
        Percent => (InfixOp::Mod, 25, 26),
        Dot => (InfixOp::Member, 28, 29),
        Arrow => (InfixOp::Arrow, 28, 29),
        _ => return None,
    };
    Some(entry)
}

fn prefix_op(kind: TokenKind) -> Option<PrefixOp> {
    use TokenKind::*;
    let op = match kind {
        Plus => PrefixOp::Plus,
        Minus => PrefixOp::Minus,
        PlusPlus => PrefixOp::Inc,
        MinusMinus => PrefixOp::Dec,
        Exclam => PrefixOp::LogicalNot,
        Not => PrefixOp::BitNot,
        Star => PrefixOp::Deref,
        And => PrefixOp::AddrOf,
        KeywordSizeof => PrefixOp::Sizeof,
        _ => return None,
    };
    Some(op)
}

/// Recursive descent over statements, precedence climbing over expressions.
/// Tokens are pulled from the lexer on demand into an append-only buffer, so
/// lookahead is unbounded. Comments never reach the grammar.
#[derive(Debug)]
pub struct Parser {
    lexer: Lexer,
    tokens: Vec<Token>,
    idx: usize,
}

impl Parser {
    pub fn new(src: &str) -> Parser {
        Parser {
            lexer: Lexer::new(src),
            tokens: Vec::new(),
            idx: 0,
        }
    }

    fn fill(&mut self, n: usize) -> Result<(), ParseError> {
        while self.tokens.len() <= self.idx + n {
            let token = self.lexer.next_token();
            match token.kind {
                TokenKind::Comment => {}
                TokenKind::ParseError => {
                    return Err(ParseError::Lexical {
                        message: token.text().unwrap_or("invalid token").to_string(),
                        snippet: Snippet::at(self.lexer.source(), token.offset),
                    })
                }
                _ => self.tokens.push(token),
            }
        }
        Ok(())
    }

    fn peek_nth(&mut self, n: usize) -> Result<&Token, ParseError> {
        self.fill(n)?;
        Ok(&self.tokens[self.idx + n])
    }

    fn peek(&mut self) -> Result<TokenKind, ParseError> {
        Ok(self.peek_nth(0)?.kind)
    }

    fn bump(&mut self) -> Result<Token, ParseError> {
        self.fill(0)?;
        let token = self.tokens[self.idx].clone();
        self.idx += 1;
        Ok(token)
    }

    fn eat(&mut self, kind: TokenKind) -> Result<bool, ParseError> {
        if self.peek()? == kind {
            self.idx += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn unexpected(&self, token: &Token, expected: impl Into<String>) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.into(),
            found: token.kind,
            snippet: Snippet::at(self.lexer.source(), token.offset),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        let token = self.bump()?;
        if token.kind == kind {
            Ok(token)
        } else {
            Err(self.unexpected(&token, kind.to_string()))
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        let token = self.expect(TokenKind::Identifier)?;
        guard!(let Some(name) = token.text() else {
            return Err(self.unexpected(&token, "identifier"));
        });
        Ok(name.to_string())
    }

    pub fn parse(&mut self) -> Result<TranslationUnit, ParseError> {
        let mut items = Vec::new();
        while self.peek()? != TokenKind::EOF {
            items.push(self.top_level()?);
        }
        debug!("parsed {} top-level items", items.len());
        Ok(TranslationUnit { items })
    }

    fn top_level(&mut self) -> Result<TopLevel, ParseError> {
        let (ty, name) = self.declarator()?;
        match self.peek()? {
            TokenKind::Semicolon => {
                self.bump()?;
                Ok(TopLevel::VarDecl(VarDecl {
                    name,
                    ty,
                    init: None,
                }))
            }
            TokenKind::Equals => {
                self.bump()?;
                let init = self.expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(TopLevel::VarDecl(VarDecl {
                    name,
                    ty,
                    init: Some(init),
                }))
            }
            TokenKind::OpenParen => {
                let sig = self.proc_sig(ty, name)?;
                if self.eat(TokenKind::Semicolon)? {
                    return Ok(TopLevel::ProcDecl(sig));
                }
                let body = self.compound_body()?;
                Ok(TopLevel::ProcDef(ProcDef { sig, body }))
            }
            _ => {
                let token = self.bump()?;
                Err(self.unexpected(&token, "`;`, `=` or `(`"))
            }
        }
    }

    fn type_specifier(&mut self) -> Result<BaseType, ParseError> {
        use TokenKind::*;
        let token = self.bump()?;
        let base = match token.kind {
            KeywordUnsigned => match self.peek()? {
                KeywordChar => {
                    self.bump()?;
                    BaseType::UnsignedChar
                }
                KeywordShort => {
                    self.bump()?;
                    BaseType::UnsignedShort
                }
                KeywordInt => {
                    self.bump()?;
                    BaseType::UnsignedInt
                }
                KeywordLong => {
                    self.bump()?;
                    BaseType::UnsignedLong
                }
                _ => BaseType::UnsignedInt,
            },
            KeywordVoid => BaseType::Void,
            KeywordChar => BaseType::Char,
            KeywordShort => BaseType::Short,
            KeywordInt => BaseType::Int,
            KeywordLong => BaseType::Long,
            KeywordFloat => BaseType::Float,
            KeywordDouble => BaseType::Double,
            _ => return Err(self.unexpected(&token, "type")),
        };
        Ok(base)
    }

    fn indirection(&mut self) -> Result<usize, ParseError> {
        let mut count = 0;
        while self.eat(TokenKind::Star)? {
            count += 1;
        }
        Ok(count)
    }

    fn declarator(&mut self) -> Result<(DataType, String), ParseError> {
        let base = self.type_specifier()?;
        let indirection = self.indirection()?;
        let name = self.ident()?;
        Ok((DataType::new(base, indirection), name))
    }

    fn proc_sig(&mut self, return_type: DataType, name: String) -> Result<ProcSig, ParseError> {
        self.expect(TokenKind::OpenParen)?;
        let mut params = Vec::new();
        let mut variadic = false;
        if self.peek()? != TokenKind::CloseParen {
            loop {
                if self.eat(TokenKind::Ellipsis)? {
                    variadic = true;
                    break;
                }
                let base = self.type_specifier()?;
                let indirection = self.indirection()?;
                let name = if self.peek()? == TokenKind::Identifier {
                    Some(self.ident()?)
                } else {
                    None
                };
                params.push(Param {
                    ty: DataType::new(base, indirection),
                    name,
                });
                if !self.eat(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::CloseParen)?;
        Ok(ProcSig {
            name,
            return_type,
            params,
            variadic,
        })
    }

    fn compound_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::OpenCurly)?;
        let mut stmts = Vec::new();
        while !self.eat(TokenKind::CloseCurly)? {
            stmts.push(self.stmt()?);
        }
        Ok(stmts)
    }

    fn var_decl(&mut self) -> Result<VarDecl, ParseError> {
        let (ty, name) = self.declarator()?;
        let init = if self.eat(TokenKind::Equals)? {
            Some(self.expr()?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon)?;
        Ok(VarDecl { name, ty, init })
    }

    pub fn stmt(&mut self) -> Result<Stmt, ParseError> {
        use TokenKind::*;
        let kind = self.peek()?;
        match kind {
            KeywordReturn => {
                self.bump()?;
                if self.eat(Semicolon)? {
                    return Ok(Stmt::Return(None));
                }
                let expr = self.expr()?;
                self.expect(Semicolon)?;
                Ok(Stmt::Return(Some(expr)))
            }
            Semicolon => {
                self.bump()?;
                Ok(Stmt::Empty)
            }
            KeywordIf => self.stmt_if(),
            KeywordWhile => self.stmt_while(),
            KeywordDo => self.stmt_do(),
            KeywordFor => self.stmt_for(),
            KeywordGoto => {
                self.bump()?;
                let name = self.ident()?;
                self.expect(Semicolon)?;
                Ok(Stmt::Goto(name))
            }
            OpenCurly => Ok(Stmt::Compound(self.compound_body()?)),
            Identifier if self.peek_nth(1)?.kind == Colon => {
                let name = self.ident()?;
                self.bump()?;
                Ok(Stmt::Label(name))
            }
            _ if kind.is_type_keyword() => Ok(Stmt::VarDecl(self.var_decl()?)),
            _ => {
                let expr = self.expr()?;
                self.expect(Semicolon)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn paren_expr(&mut self) -> Result<Expr, ParseError> {
        self.expect(TokenKind::OpenParen)?;
        let expr = self.expr()?;
        self.expect(TokenKind::CloseParen)?;
        Ok(expr)
    }

    fn stmt_if(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::KeywordIf)?;
        let cond = self.paren_expr()?;
        let then = Box::new(self.stmt()?);
        let else_ = if self.eat(TokenKind::KeywordElse)? {
            Some(Box::new(self.stmt()?))
        } else {
            None
        };
        Ok(Stmt::If(StmtIf { cond, then, else_ }))
    }

    fn stmt_while(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::KeywordWhile)?;
        let cond = self.paren_expr()?;
        let body = Box::new(self.stmt()?);
        Ok(Stmt::While(StmtWhile { cond, body }))
    }

    fn stmt_do(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::KeywordDo)?;
        let body = Box::new(self.stmt()?);
        self.expect(TokenKind::KeywordWhile)?;
        let cond = self.paren_expr()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt::Do(StmtDo { cond, body }))
    }

    fn stmt_for(&mut self) -> Result<Stmt, ParseError> {
        use TokenKind::*;
        self.expect(KeywordFor)?;
        self.expect(OpenParen)?;
        let init = if self.eat(Semicolon)? {
            Stmt::Empty
        } else if self.peek()?.is_type_keyword() {
            Stmt::VarDecl(self.var_decl()?)
        } else {
            let expr = self.expr()?;
            self.expect(Semicolon)?;
            Stmt::Expr(expr)
        };
        let cond = if self.peek()? == Semicolon {
            None
        } else {
            Some(self.expr()?)
        };
        self.expect(Semicolon)?;
        let step = if self.peek()? == CloseParen {
            None
        } else {
            Some(self.expr()?)
        };
        self.expect(CloseParen)?;
        let body = Box::new(self.stmt()?);
        Ok(Stmt::For(StmtFor {
            init: Box::new(init),
            cond,
            step,
            body,
        }))
    }

    pub fn expr(&mut self) -> Result<Expr, ParseError> {
        self.expression(0, false)
    }

    /// Precedence climbing. With `break_at_comma` a top-level `,` ends the
    /// expression instead of acting as the comma operator.
    fn expression(&mut self, min_bp: u8, break_at_comma: bool) -> Result<Expr, ParseError> {
        let mut lhs = self.operand(break_at_comma)?;

        loop {
            let kind = self.peek()?;
            match kind {
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    if POSTFIX_BP < min_bp {
                        break;
                    }
                    self.bump()?;
                    let op = if kind == TokenKind::PlusPlus {
                        PostfixOp::Inc
                    } else {
                        PostfixOp::Dec
                    };
                    lhs = Expr::Postfix(ExprPostfix {
                        op,
                        expr: Box::new(lhs),
                    });
                }
                TokenKind::OpenBracket => {
                    if POSTFIX_BP < min_bp {
                        break;
                    }
                    self.bump()?;
                    let index = self.expression(0, false)?;
                    self.expect(TokenKind::CloseBracket)?;
                    lhs = Expr::Infix(ExprInfix {
                        op: InfixOp::Index,
                        lhs: Box::new(lhs),
                        rhs: Box::new(index),
                    });
                }
                TokenKind::QuestionMark => {
                    let (lbp, rbp) = TERNARY_BP;
                    if lbp < min_bp {
                        break;
                    }
                    self.bump()?;
                    let then = self.expression(0, false)?;
                    self.expect(TokenKind::Colon)?;
                    let else_ = self.expression(rbp, break_at_comma)?;
                    lhs = Expr::Ternary(ExprTernary {
                        cond: Box::new(lhs),
                        then: Box::new(then),
                        else_: Box::new(else_),
                    });
                }
                _ => {
                    guard!(let Some((op, lbp, rbp)) = infix_binding_power(kind) else {
                        break;
                    });
                    if lbp < min_bp || (op == InfixOp::Comma && break_at_comma) {
                        break;
                    }
                    self.bump()?;
                    let rhs = self.expression(rbp, break_at_comma)?;
                    lhs = Expr::Infix(ExprInfix {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    });
                }
            }
        }

        Ok(lhs)
    }

    fn operand(&mut self, break_at_comma: bool) -> Result<Expr, ParseError> {
        let token = self.bump()?;
        let expr = match (token.kind, &token.payload) {
            (TokenKind::IntLiteral, TokenPayload::Int(i)) => Expr::IntLit(*i),
            (TokenKind::FloatLiteral, TokenPayload::Float(f)) => Expr::FloatLit(*f),
            (TokenKind::CharLiteral, TokenPayload::Int(i)) => {
                guard!(let Some(c) = u32::try_from(*i).ok().and_then(char::from_u32) else {
                    return Err(self.unexpected(&token, "character literal"));
                });
                Expr::CharLit(c)
            }
            (TokenKind::StringLiteral, TokenPayload::Text(s)) => Expr::StrLit(s.clone()),
            (TokenKind::Identifier, TokenPayload::Text(name)) => {
                if self.eat(TokenKind::OpenParen)? {
                    Expr::Call(ExprCall {
                        name: name.clone(),
                        args: self.call_args()?,
                    })
                } else {
                    Expr::Var(name.clone())
                }
            }
            (TokenKind::OpenParen, _) => {
                let expr = self.expression(0, false)?;
                self.expect(TokenKind::CloseParen)?;
                expr
            }
            (kind, _) => {
                guard!(let Some(op) = prefix_op(kind) else {
                    return Err(self.unexpected(&token, "expression"));
                });
                let operand = self.expression(PREFIX_BP, break_at_comma)?;
                Expr::Prefix(ExprPrefix {
                    op,
                    expr: Box::new(operand),
                })
            }
        };
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat(TokenKind::CloseParen)? {
            return Ok(args);
        }
        loop {
            args.push(self.expression(0, true)?);
            if !self.eat(TokenKind::Comma)? {
                break;
            }
        }
        self.expect(TokenKind::CloseParen)?;
        Ok(args)
    }
}
