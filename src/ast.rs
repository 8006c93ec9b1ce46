use crate::bit::Bit;
use derive_more::Display;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BaseType {
    #[display(fmt = "void")]
    Void,
    #[display(fmt = "char")]
    Char,
    #[display(fmt = "short")]
    Short,
    #[display(fmt = "int")]
    Int,
    #[display(fmt = "long")]
    Long,
    #[display(fmt = "unsigned char")]
    UnsignedChar,
    #[display(fmt = "unsigned short")]
    UnsignedShort,
    #[display(fmt = "unsigned int")]
    UnsignedInt,
    #[display(fmt = "unsigned long")]
    UnsignedLong,
    #[display(fmt = "float")]
    Float,
    #[display(fmt = "double")]
    Double,
}

impl BaseType {
    pub fn size(self) -> usize {
        match self {
            BaseType::Void => 0,
            BaseType::Char | BaseType::UnsignedChar => 1,
            BaseType::Short | BaseType::UnsignedShort => 2,
            BaseType::Int | BaseType::UnsignedInt | BaseType::Float => 4,
            BaseType::Long | BaseType::UnsignedLong | BaseType::Double => 8,
        }
    }
}

pub const POINTER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    pub base: BaseType,
    pub indirection: usize,
}

impl DataType {
    pub fn new(base: BaseType, indirection: usize) -> DataType {
        DataType { base, indirection }
    }

    pub fn scalar(base: BaseType) -> DataType {
        DataType::new(base, 0)
    }

    pub fn size(&self) -> usize {
        if self.indirection > 0 {
            POINTER_SIZE
        } else {
            self.base.size()
        }
    }

    pub fn bit(&self) -> Option<Bit> {
        Bit::from_size(self.size())
    }

    /// Values wider than four bytes live in the `x` form of a register.
    pub fn is_wide(&self) -> bool {
        self.size() > 4
    }

    pub fn is_void(&self) -> bool {
        self.base == BaseType::Void && self.indirection == 0
    }

    pub fn is_signed(&self) -> bool {
        self.indirection == 0
            && !matches!(
                self.base,
                BaseType::UnsignedChar
                    | BaseType::UnsignedShort
                    | BaseType::UnsignedInt
                    | BaseType::UnsignedLong
            )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.base, "*".repeat(self.indirection))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum InfixOp {
    #[display(fmt = ",")]
    Comma,
    #[display(fmt = "=")]
    Assign,
    #[display(fmt = "+=")]
    AddAssign,
    #[display(fmt = "-=")]
    SubAssign,
    #[display(fmt = "*=")]
    MulAssign,
    #[display(fmt = "/=")]
    DivAssign,
    #[display(fmt = "%=")]
    ModAssign,
    #[display(fmt = "<<=")]
    ShlAssign,
    #[display(fmt = ">>=")]
    ShrAssign,
    #[display(fmt = "&=")]
    AndAssign,
    #[display(fmt = "|=")]
    OrAssign,
    #[display(fmt = "^=")]
    XorAssign,
    #[display(fmt = "||")]
    LogicalOr,
    #[display(fmt = "&&")]
    LogicalAnd,
    #[display(fmt = "|")]
    BitOr,
    #[display(fmt = "^")]
    BitXor,
    #[display(fmt = "&")]
    BitAnd,
    #[display(fmt = "==")]
    Eq,
    #[display(fmt = "!=")]
    Ne,
    #[display(fmt = "<")]
    Lt,
    #[display(fmt = "<=")]
    Le,
    #[display(fmt = ">")]
    Gt,
    #[display(fmt = ">=")]
    Ge,
    #[display(fmt = "<<")]
    Shl,
    #[display(fmt = ">>")]
    Shr,
    #[display(fmt = "+")]
    Add,
    #[display(fmt = "-")]
    Sub,
    #[display(fmt = "*")]
    Mul,
    #[display(fmt = "/")]
    Div,
    #[display(fmt = "%")]
    Mod,
    #[display(fmt = "[")]
    Index,
    #[display(fmt = ".")]
    Member,
    #[display(fmt = "->")]
    Arrow,
}

impl InfixOp {
    /// The plain operator a compound assignment applies before storing.
    pub fn compound_base(self) -> Option<InfixOp> {
        use InfixOp::*;
        match self {
            AddAssign => Some(Add),
            SubAssign => Some(Sub),
            MulAssign => Some(Mul),
            DivAssign => Some(Div),
            ModAssign => Some(Mod),
            ShlAssign => Some(Shl),
            ShrAssign => Some(Shr),
            AndAssign => Some(BitAnd),
            OrAssign => Some(BitOr),
            XorAssign => Some(BitXor),
            _ => None,
        }
    }

    /// Operators computed from two already-evaluated operands.
    pub fn is_arithmetic(self) -> bool {
        use InfixOp::*;
        matches!(
            self,
            Add | Sub | Mul | Div | Mod | BitAnd | BitOr | BitXor | Shl | Shr | Eq | Ne | Lt | Le | Gt | Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PrefixOp {
    #[display(fmt = "+")]
    Plus,
    #[display(fmt = "-")]
    Minus,
    #[display(fmt = "++")]
    Inc,
    #[display(fmt = "--")]
    Dec,
    #[display(fmt = "!")]
    LogicalNot,
    #[display(fmt = "~")]
    BitNot,
    #[display(fmt = "*")]
    Deref,
    #[display(fmt = "&")]
    AddrOf,
    #[display(fmt = "sizeof")]
    Sizeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PostfixOp {
    #[display(fmt = "++")]
    Inc,
    #[display(fmt = "--")]
    Dec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUnit {
    pub items: Vec<TopLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TopLevel {
    ProcDecl(ProcSig),
    ProcDef(ProcDef),
    VarDecl(VarDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: DataType,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcSig {
    pub name: String,
    pub return_type: DataType,
    pub params: Vec<Param>,
    pub variadic: bool,
}

impl ProcSig {
    /// Parameters that occupy an argument register; a lone `void` does not.
    pub fn value_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| !p.ty.is_void())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcDef {
    pub sig: ProcSig,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: DataType,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Empty,
    Compound(Vec<Stmt>),
    If(StmtIf),
    While(StmtWhile),
    Do(StmtDo),
    For(StmtFor),
    Return(Option<Expr>),
    Goto(String),
    Label(String),
    VarDecl(VarDecl),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StmtIf {
    pub cond: Expr,
    pub then: Box<Stmt>,
    pub else_: Option<Box<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StmtWhile {
    pub cond: Expr,
    pub body: Box<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StmtDo {
    pub cond: Expr,
    pub body: Box<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StmtFor {
    /// A declaration, an expression statement, or `Empty`.
    pub init: Box<Stmt>,
    pub cond: Option<Expr>,
    pub step: Option<Expr>,
    pub body: Box<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    Call(ExprCall),
    IntLit(i64),
    FloatLit(f32),
    CharLit(char),
    /// Raw literal text, quotes and escapes included.
    StrLit(String),
    Infix(ExprInfix),
    Prefix(ExprPrefix),
    Postfix(ExprPostfix),
    Ternary(ExprTernary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprCall {
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprInfix {
    pub op: InfixOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprPrefix {
    pub op: PrefixOp,
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprPostfix {
    pub op: PostfixOp,
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprTernary {
    pub cond: Box<Expr>,
    pub then: Box<Expr>,
    pub else_: Box<Expr>,
}

/// Stands in for an omitted `for` condition or step.
static ABSENT_CLAUSE: Stmt = Stmt::Empty;

/// Uniform borrowed view over every node kind, for generic tree walks.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Unit(&'a TranslationUnit),
    ProcDecl(&'a ProcSig),
    ProcDef(&'a ProcDef),
    VarDecl(&'a VarDecl),
    Stmt(&'a Stmt),
    Expr(&'a Expr),
}

impl<'a> From<&'a TopLevel> for NodeRef<'a> {
    fn from(item: &'a TopLevel) -> Self {
        match item {
            TopLevel::ProcDecl(x) => NodeRef::ProcDecl(x),
            TopLevel::ProcDef(x) => NodeRef::ProcDef(x),
            TopLevel::VarDecl(x) => NodeRef::VarDecl(x),
        }
    }
}

impl<'a> From<&'a Stmt> for NodeRef<'a> {
    fn from(stmt: &'a Stmt) -> Self {
        match stmt {
            Stmt::VarDecl(x) => NodeRef::VarDecl(x),
            Stmt::Expr(x) => NodeRef::Expr(x),
            _ => NodeRef::Stmt(stmt),
        }
    }
}

impl<'a> From<&'a Expr> for NodeRef<'a> {
    fn from(expr: &'a Expr) -> Self {
        NodeRef::Expr(expr)
    }
}

impl<'a> NodeRef<'a> {
    /// Semantic operands in source order.
    pub fn children(self) -> Vec<NodeRef<'a>> {
        match self {
            NodeRef::Unit(x) => x.items.iter().map(NodeRef::from).collect(),
            NodeRef::ProcDecl(_) => Vec::new(),
            NodeRef::ProcDef(x) => x.body.iter().map(NodeRef::from).collect(),
            NodeRef::VarDecl(x) => x.init.iter().map(NodeRef::from).collect(),
            NodeRef::Stmt(stmt) => match stmt {
                Stmt::Empty | Stmt::Goto(_) | Stmt::Label(_) => Vec::new(),
                Stmt::Compound(stmts) => stmts.iter().map(NodeRef::from).collect(),
                Stmt::If(x) => {
                    let mut children = vec![NodeRef::from(&x.cond), NodeRef::from(&*x.then)];
                    if let Some(else_) = &x.else_ {
                        children.push(NodeRef::from(&**else_));
                    }
                    children
                }
                Stmt::While(x) => vec![NodeRef::from(&x.cond), NodeRef::from(&*x.body)],
                Stmt::Do(x) => vec![NodeRef::from(&x.cond), NodeRef::from(&*x.body)],
                Stmt::For(x) => {
                    let clause = |e: &'a Option<Expr>| match e {
                        Some(e) => NodeRef::from(e),
                        None => NodeRef::Stmt(&ABSENT_CLAUSE),
                    };
                    vec![
                        NodeRef::from(&*x.init),
                        clause(&x.cond),
                        clause(&x.step),
                        NodeRef::from(&*x.body),
                    ]
                }
                Stmt::Return(x) => x.iter().map(NodeRef::from).collect(),
                Stmt::VarDecl(x) => NodeRef::VarDecl(x).children(),
                Stmt::Expr(x) => NodeRef::Expr(x).children(),
            },
            NodeRef::Expr(expr) => match expr {
                Expr::Var(_)
                | Expr::IntLit(_)
                | Expr::FloatLit(_)
                | Expr::CharLit(_)
                | Expr::StrLit(_) => Vec::new(),
                Expr::Call(x) => x.args.iter().map(NodeRef::from).collect(),
                Expr::Infix(x) => vec![NodeRef::from(&*x.lhs), NodeRef::from(&*x.rhs)],
                Expr::Prefix(x) => vec![NodeRef::from(&*x.expr)],
                Expr::Postfix(x) => vec![NodeRef::from(&*x.expr)],
                Expr::Ternary(x) => vec![
                    NodeRef::from(&*x.cond),
                    NodeRef::from(&*x.then),
                    NodeRef::from(&*x.else_),
                ],
            },
        }
    }

    pub fn label(self) -> String {
        match self {
            NodeRef::Unit(_) => "TranslationUnit".to_string(),
            NodeRef::ProcDecl(x) => x.name.clone(),
            NodeRef::ProcDef(x) => x.sig.name.clone(),
            NodeRef::VarDecl(x) => format!("{} {}", x.ty, x.name),
            NodeRef::Stmt(stmt) => match stmt {
                Stmt::Empty => "EmptyStatement".to_string(),
                Stmt::Compound(_) => "CompoundStatement".to_string(),
                Stmt::If(_) => "IfStatement".to_string(),
                Stmt::While(_) => "WhileStatement".to_string(),
                Stmt::Do(_) => "DoStatement".to_string(),
                Stmt::For(_) => "ForStatement".to_string(),
                Stmt::Return(_) => "ReturnStatement".to_string(),
                Stmt::Goto(name) => format!("goto {}", name),
                Stmt::Label(name) => format!("{}:", name),
                Stmt::VarDecl(x) => NodeRef::VarDecl(x).label(),
                Stmt::Expr(x) => NodeRef::Expr(x).label(),
            },
            NodeRef::Expr(expr) => match expr {
                Expr::Var(name) => name.clone(),
                Expr::Call(x) => x.name.clone(),
                Expr::IntLit(i) => i.to_string(),
                Expr::FloatLit(f) => f.to_string(),
                Expr::CharLit(c) => c.to_string(),
                Expr::StrLit(s) => s.clone(),
                Expr::Infix(x) => x.op.to_string(),
                Expr::Prefix(x) => x.op.to_string(),
                Expr::Postfix(x) => x.op.to_string(),
                Expr::Ternary(_) => "?".to_string(),
            },
        }
    }

    /// Pre-order walk over this node and all of its descendants.
    pub fn walk(self, f: &mut impl FnMut(NodeRef<'a>)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }
}
