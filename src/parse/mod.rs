pub mod bytecode;
pub mod hdl;
pub mod string_lexer;
pub mod tst;

pub use string_lexer::{Spanned, StringLexer};
