//! Frontend module - Lexer, Symbol Table, Parser

pub mod token;
pub mod lexer;
pub mod ast;
pub mod visit;
pub mod symbols;
pub mod parser;
mod parser_statements;

pub use ast::Procedure;
pub use parser::parse;
