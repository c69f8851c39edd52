//! Message-matcher expression language: a small boolean grammar over Heka
//! message headers and fields, compiled once into a tree and evaluated
//! per-message with short-circuiting.

pub mod ast;
pub mod compile;
pub mod eval;
pub mod pattern;

pub use ast::Node;
pub use compile::compile;
pub use eval::eval;
