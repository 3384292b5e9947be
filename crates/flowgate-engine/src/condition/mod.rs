//! Restricted condition language used by Decision nodes and trigger matching.
//!
//! ```text
//! request.priority == 'URGENT' && (total >= 1000 || !approved)
//! ```

mod evaluator;
mod lexer;
mod parser;

pub use evaluator::{lookup, truthy, ConditionEvaluator};
pub use parser::{parse, CompareOp, Expr};
