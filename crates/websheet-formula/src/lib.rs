pub mod ast;
pub mod context;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod resolve;

#[cfg(test)]
pub(crate) mod testing;

pub use ast::{BinaryOp, Expr, ExprKind, Loc, Selector, UnaryOp};
pub use context::{Env, SheetContext, TableShape};
pub use evaluator::Evaluator;
pub use parser::{parse_cell, parse_permission, ParseError};
pub use resolve::{censor, readable, resolve};

use websheet_core::{SheetError, Value};

/// Parse and evaluate a free-standing formula as `user`, resolved
pub fn evaluate_formula(
    ctx: &mut dyn SheetContext,
    user: &str,
    source: &str,
    env: &Env,
) -> Result<Value, SheetError> {
    let expr = parse_cell(source, "eval")?;
    Evaluator::new(ctx, user).eval_resolved(&expr, env)
}
