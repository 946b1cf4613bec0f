use std::collections::HashSet;

use super::arity;
use crate::context::Env;
use crate::evaluator::Evaluator;
use crate::resolve::censor;
use websheet_core::{SheetError, Value};

/// ASSERT - Fail with `msg` unless `cond` holds; otherwise yield `v` (or null)
pub fn assert(ev: &mut Evaluator<'_>, args: Vec<Value>, _env: &Env) -> Result<Value, SheetError> {
    arity("ASSERT", &args, 2, 3)?;
    let mut args = args.into_iter();
    let (Some(cond), Some(msg)) = (args.next(), args.next()) else {
        return Err(SheetError::InvalidArgument("ASSERT expects a condition and a message".into()));
    };
    let value = args.next();

    let cond = ev.resolve(cond)?;
    let msg = ev.resolve(msg)?;
    let holds = cond.as_bool().ok_or_else(|| {
        SheetError::type_error(format!(
            "ASSERT condition must be a boolean, got {}",
            cond.type_name()
        ))
    })?;
    if !holds {
        let user = ev.user().to_string();
        let shown = censor(&msg, &user, ev.context())?;
        return Err(SheetError::Assertion(shown.to_string()));
    }

    let result = value.unwrap_or_else(Value::null);
    Ok(result.add_deps(&cond.all_deps()).add_deps(&msg.all_deps()))
}

/// DEBUG - Log the argument and return it unchanged
pub fn debug(ev: &mut Evaluator<'_>, mut args: Vec<Value>, _env: &Env) -> Result<Value, SheetError> {
    arity("DEBUG", &args, 1, 1)?;
    let value = args.remove(0);
    tracing::debug!(user = ev.user(), value = %value, deps = value.all_deps().len(), "DEBUG");
    Ok(value)
}

/// FIX - Freeze a value: none of its dependencies will invalidate it again
pub fn fix(ev: &mut Evaluator<'_>, mut args: Vec<Value>, _env: &Env) -> Result<Value, SheetError> {
    arity("FIX", &args, 1, 1)?;
    let mut value = ev.resolve(args.remove(0))?;
    value.visit_deps_mut(&mut |deps| deps.freeze());
    Ok(value)
}

/// TRUST - Republish a value under the cell owner's authority.
///
/// Every cell dependency the owner can read stops being enforced, so readers
/// of the result no longer need access to it.
pub fn trust(ev: &mut Evaluator<'_>, mut args: Vec<Value>, env: &Env) -> Result<Value, SheetError> {
    arity("TRUST", &args, 1, 1)?;
    let owner = env
        .str_var("cellOwner")
        .ok_or_else(|| SheetError::InvalidArgument("cannot use TRUST outside a cell".into()))?
        .to_string();

    let mut value = ev.resolve(args.remove(0))?;

    let mut readable = HashSet::new();
    for dep in value.all_deps().iter() {
        if let Some(coord) = dep.enforced_coord() {
            if ev.context().can_read(&owner, coord)? {
                readable.insert(coord.clone());
            }
        }
    }

    value.visit_deps_mut(&mut |deps| deps.relax_enforce(|coord| readable.contains(coord)));
    Ok(value)
}
