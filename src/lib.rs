pub mod ast;
pub mod bit;
pub mod buf;
pub mod driver;
pub mod error;
pub mod frame;
pub mod generator;
pub mod lexer;
pub mod loc;
pub mod parser;
pub mod printer;
pub mod reg_alloc;
pub mod token;

use crate::ast::NodeRef;
use crate::error::CompileError;
use crate::lexer::{Lexer, LexerError};
use crate::parser::{ParseError, Parser};

/// Source text to assembly text for one translation unit.
pub fn compile(src: &str) -> Result<String, CompileError> {
    let unit = Parser::new(src).parse()?;
    Ok(generator::generate(&unit)?)
}

/// One token per line, comments included.
pub fn dump_tokens(src: &str) -> Result<String, LexerError> {
    let tokens = Lexer::new(src).tokenize()?;
    Ok(tokens.iter().map(|t| format!("{}\n", t)).collect())
}

pub fn dump_ast(src: &str) -> Result<String, ParseError> {
    let unit = Parser::new(src).parse()?;
    Ok(printer::tree(NodeRef::Unit(&unit)))
}
