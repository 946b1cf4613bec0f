use super::arity;
use crate::context::Env;
use crate::evaluator::Evaluator;
use crate::resolve::censor;
use websheet_core::{DepSet, Rendered, SheetError, Value};

/// MAIL - Send a message through the sheet's mailer.
///
/// Arguments are censored for the calling user first; an unreadable
/// recipient refuses the send, unreadable subject or body text goes out as
/// the censored sentinel.
pub fn mail(ev: &mut Evaluator<'_>, args: Vec<Value>, _env: &Env) -> Result<Value, SheetError> {
    arity("MAIL", &args, 3, 3)?;

    let mut deps = DepSet::new();
    let mut texts = Vec::with_capacity(3);
    for arg in args {
        let value = ev.resolve(arg)?;
        deps.extend(&value.all_deps());
        let user = ev.user().to_string();
        let rendered = censor(&value, &user, ev.context())?;
        match rendered {
            Rendered::Text(_) | Rendered::Censored => texts.push(rendered),
            other => {
                return Err(SheetError::type_error(format!("{} is not a string", other)))
            }
        }
    }

    if texts[0].is_censored() {
        return Err(SheetError::PermissionDenied("cannot read recipient".into()));
    }
    let [to, subject, body] = [&texts[0], &texts[1], &texts[2]].map(|t| t.to_string());

    ev.context().send_mail(&to, &subject, &body)?;
    Ok(Value::null().add_deps(&deps))
}

#[cfg(test)]
mod tests {
    use crate::testing::{eval_str, MockSheet};
    use websheet_core::{CellCoord, SheetError, Value};

    fn sheet() -> MockSheet {
        MockSheet::new().table(
            "People",
            &["email", "note"],
            vec![vec![Value::string("ann@example.com"), Value::string("hi")]],
        )
    }

    #[test]
    fn test_mail_sends() {
        let mut ctx = sheet();
        let v = eval_str(&mut ctx, "alice", "MAIL(People.0.email, \"Hello\", People.0.note)").unwrap();
        assert_eq!(v.canonical(), "null");
        assert_eq!(
            ctx.mails,
            vec![("ann@example.com".to_string(), "Hello".to_string(), "hi".to_string())]
        );
    }

    #[test]
    fn test_mail_censors() {
        let mut ctx = sheet()
            .hide("bob", CellCoord::new("People", 0, "note"))
            .hide("eve", CellCoord::new("People", 0, "email"));

        eval_str(&mut ctx, "bob", "MAIL(People.0.email, \"s\", People.0.note)").unwrap();
        assert_eq!(ctx.mails[0].2, "[[censored]]");

        assert!(matches!(
            eval_str(&mut ctx, "eve", "MAIL(People.0.email, \"s\", \"b\")"),
            Err(SheetError::PermissionDenied(_))
        ));
        assert!(matches!(
            eval_str(&mut ctx, "alice", "MAIL(1, \"s\", \"b\")"),
            Err(SheetError::RuntimeType(_))
        ));
        assert_eq!(ctx.mails.len(), 1);
    }
}
