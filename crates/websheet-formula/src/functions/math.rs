use crate::context::Env;
use crate::evaluator::Evaluator;
use websheet_core::{DepSet, SheetError, Value, ValueKind};

// A single list argument is spread; otherwise every argument is one term.
fn numbers(
    name: &str,
    ev: &mut Evaluator<'_>,
    args: Vec<Value>,
) -> Result<(Vec<f64>, DepSet), SheetError> {
    let mut resolved = Vec::with_capacity(args.len());
    for arg in args {
        resolved.push(ev.resolve(arg)?);
    }

    let mut deps = DepSet::new();
    if resolved.len() == 1 && resolved[0].is_list() {
        let list = resolved.remove(0);
        deps.extend(&list.deps);
        if let ValueKind::List(items) = list.kind {
            resolved = items;
        }
    }

    let mut terms = Vec::with_capacity(resolved.len());
    for value in &resolved {
        deps.extend(&value.all_deps());
        match value.as_number() {
            Some(n) => terms.push(n),
            None => {
                return Err(SheetError::type_error(format!(
                    "cannot {} {}",
                    name,
                    value.type_name()
                )))
            }
        }
    }
    Ok((terms, deps))
}

/// sum - Sum of numbers
pub fn sum(ev: &mut Evaluator<'_>, args: Vec<Value>, _env: &Env) -> Result<Value, SheetError> {
    let (terms, deps) = numbers("sum", ev, args)?;
    Ok(Value::number(terms.iter().sum()).add_deps(&deps))
}

/// avg - Arithmetic mean of numbers
pub fn avg(ev: &mut Evaluator<'_>, args: Vec<Value>, _env: &Env) -> Result<Value, SheetError> {
    let (terms, deps) = numbers("avg", ev, args)?;
    if terms.is_empty() {
        return Err(SheetError::type_error("cannot avg an empty list"));
    }
    let total: f64 = terms.iter().sum();
    Ok(Value::number(total / terms.len() as f64).add_deps(&deps))
}
