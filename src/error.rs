use crate::generator::CodegenError;
use crate::lexer::LexerError;
use crate::parser::ParseError;
use thiserror::Error;

/// Faults in the compiler itself, never caused by the program being compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    #[error("all scratch registers are in use")]
    RegistersExhausted,
    #[error("`{proc_name}` acquired {acquired} registers but released {released}")]
    RegisterLeak {
        proc_name: String,
        acquired: usize,
        released: usize,
    },
    #[error("parameter {index} of `{proc_name}` has no name")]
    UnnamedParameter { proc_name: String, index: usize },
    #[error("register {0} is not an allocated scratch register")]
    ForeignRegister(String),
    #[error("code generation for {0} is not implemented")]
    Unimplemented(String),
    #[error("frame of {0} bytes cannot be addressed")]
    FrameOverflow(usize),
}

#[derive(Error, Debug, Clone)]
pub enum CompileError {
    #[error(transparent)]
    Lexer(#[from] LexerError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

impl CompileError {
    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Codegen(CodegenError::Internal(_)))
    }
}
