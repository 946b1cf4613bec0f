use super::arity;
use crate::context::Env;
use crate::evaluator::Evaluator;
use websheet_core::{SheetError, Value, ValueKind};

/// id - The argument itself, resolved
pub fn id(ev: &mut Evaluator<'_>, mut args: Vec<Value>, _env: &Env) -> Result<Value, SheetError> {
    arity("id", &args, 1, 1)?;
    ev.resolve(args.remove(0))
}

/// concat - Join lists into one list
pub fn concat(ev: &mut Evaluator<'_>, args: Vec<Value>, _env: &Env) -> Result<Value, SheetError> {
    let mut items = Vec::new();
    let mut result = Value::list(Vec::new());

    for arg in args {
        let arg = ev.resolve(arg)?;
        match arg.kind {
            ValueKind::List(values) => {
                result.deps.extend(&arg.deps);
                items.extend(values);
            }
            kind => {
                return Err(SheetError::type_error(format!(
                    "cannot concat {}",
                    Value::new(kind)
                )))
            }
        }
    }

    result.kind = ValueKind::List(items);
    Ok(result)
}

/// len - Length of a list, tuple or string
pub fn len(ev: &mut Evaluator<'_>, mut args: Vec<Value>, _env: &Env) -> Result<Value, SheetError> {
    arity("len", &args, 1, 1)?;
    let value = ev.resolve(args.remove(0))?;

    let n = match &value.kind {
        ValueKind::List(items) => items.len(),
        ValueKind::Tuple(fields) => fields.len(),
        _ => match value.as_str() {
            Some(s) => s.chars().count(),
            None => {
                return Err(SheetError::type_error(format!(
                    "cannot take the length of {}",
                    value.type_name()
                )))
            }
        },
    };

    Ok(Value::number(n as f64).add_deps(&value.all_deps()))
}

#[cfg(test)]
mod tests {
    use crate::testing::{eval_str, MockSheet};
    use websheet_core::SheetError;

    fn canon(input: &str) -> String {
        let mut ctx = MockSheet::new().table(
            "T",
            &["a"],
            vec![vec![websheet_core::Value::number(1.0)]],
        );
        eval_str(&mut ctx, "alice", input).unwrap().canonical()
    }

    #[test]
    fn test_id() {
        assert_eq!(canon("id(T.a)"), "[1]");
    }

    #[test]
    fn test_concat() {
        assert_eq!(canon("concat([1], T.a, [])"), "[1, 1]");
        let err = eval_str(&mut MockSheet::new(), "alice", "concat([1], 2)").unwrap_err();
        assert!(matches!(err, SheetError::RuntimeType(_)));
    }

    #[test]
    fn test_len() {
        assert_eq!(canon("len([1, 2, 3])"), "3");
        assert_eq!(canon("len({a: 1})"), "1");
        assert_eq!(canon("len(\"héllo\")"), "5");
        assert!(eval_str(&mut MockSheet::new(), "alice", "len(1)").is_err());
        assert!(matches!(
            eval_str(&mut MockSheet::new(), "alice", "len()"),
            Err(SheetError::InvalidArgument(_))
        ));
    }
}
