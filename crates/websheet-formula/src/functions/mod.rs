//! Built-in function library.
//!
//! Built-ins receive their arguments evaluated but unresolved, and manage
//! resolution and dependency propagation themselves.

pub mod datetime;
pub mod logical;
pub mod mail;
pub mod math;
pub mod text;

use crate::context::Env;
use crate::evaluator::Evaluator;
use websheet_core::{SheetError, Value};

pub type Builtin = fn(&mut Evaluator<'_>, Vec<Value>, &Env) -> Result<Value, SheetError>;

/// Names of every built-in, for keyword listings
pub const NAMES: &[&str] = &[
    "id", "concat", "len", "sum", "avg", "ASSERT", "DEBUG", "FIX", "TRUST", "AFTER", "TRIGGER",
    "MAIL",
];

pub fn lookup(name: &str) -> Option<Builtin> {
    let f: Builtin = match name {
        "id" => text::id,
        "concat" => text::concat,
        "len" => text::len,
        "sum" => math::sum,
        "avg" => math::avg,
        "ASSERT" => logical::assert,
        "DEBUG" => logical::debug,
        "FIX" => logical::fix,
        "TRUST" => logical::trust,
        "AFTER" => datetime::after,
        "TRIGGER" => datetime::trigger,
        "MAIL" => mail::mail,
        _ => return None,
    };
    Some(f)
}

/// Fail unless `args` has between `min` and `max` entries
pub(crate) fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), SheetError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(SheetError::InvalidArgument(format!(
            "{} expects {} arguments, got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}
