use tracing::trace;

use crate::ast::{BinaryOp, Expr, ExprKind, Selector, UnaryOp};
use crate::context::{Env, SheetContext, TableShape};
use crate::functions;
use crate::resolve::{resolve, row_refs, shape_of};
use websheet_core::{ColSel, DepSet, RowSel, Scalar, SheetError, TableRef, Value, ValueKind};

/// Tree-walking interpreter evaluating formulas on behalf of one user
pub struct Evaluator<'a> {
    ctx: &'a mut dyn SheetContext,
    user: &'a str,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a mut dyn SheetContext, user: &'a str) -> Self {
        Evaluator { ctx, user }
    }

    pub fn user(&self) -> &str {
        self.user
    }

    pub fn context(&mut self) -> &mut dyn SheetContext {
        &mut *self.ctx
    }

    pub fn resolve(&mut self, value: Value) -> Result<Value, SheetError> {
        resolve(value, &mut *self.ctx)
    }

    fn shape(&self, table: &str) -> Result<TableShape, SheetError> {
        shape_of(&*self.ctx, table)
    }

    /// Evaluate and resolve: the result holds no table references
    pub fn eval_resolved(&mut self, expr: &Expr, env: &Env) -> Result<Value, SheetError> {
        let value = self.eval(expr, env)?;
        self.resolve(value)
    }

    /// Evaluate an expression; table references may stay lazy
    pub fn eval(&mut self, expr: &Expr, env: &Env) -> Result<Value, SheetError> {
        match &expr.kind {
            ExprKind::Literal(s) => Ok(Value::scalar(s.clone())),
            ExprKind::Ident(name) => self.eval_ident(name, env),
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right, env),
            ExprKind::Unary { op, operand } => self.eval_unary(*op, operand, env),
            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?);
                }
                Ok(Value::list(values))
            }
            ExprKind::Tuple(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for (name, item) in fields {
                    values.push((name.clone(), self.eval(item, env)?));
                }
                Ok(Value::tuple(values))
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.eval_resolved(cond, env)?;
                let branch = match cond.as_bool() {
                    Some(true) => then,
                    Some(false) => otherwise,
                    None => {
                        return Err(SheetError::type_error(format!(
                            "condition must be a boolean, got {}",
                            cond.type_name()
                        )))
                    }
                };
                Ok(self.eval(branch, env)?.add_deps(&cond.all_deps()))
            }
            ExprKind::Select { target, key } => {
                let target = self.eval(target, env)?;
                self.select(target, key)
            }
            ExprKind::Project { target, keys } => {
                let target = self.eval(target, env)?;
                self.project(target, keys)
            }
            ExprKind::Generate {
                expr: body,
                bindings,
                cond,
            } => self.generate(body, bindings, cond.as_deref(), env),
            ExprKind::Filter { target, pred } => {
                let target = self.eval(target, env)?;
                self.filter(target, pred, env)
            }
            ExprKind::Call { name, args } => self.call(name, args, env),
        }
    }

    fn eval_ident(&mut self, name: &str, env: &Env) -> Result<Value, SheetError> {
        if let Some(value) = env.get(name) {
            return Ok(value.clone());
        }
        if self.ctx.table_shape(name).is_some() {
            return Ok(Value::table_ref(TableRef::whole(name)));
        }
        Err(SheetError::UndefinedIdentifier(name.to_string()))
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        env: &Env,
    ) -> Result<Value, SheetError> {
        let left = self.eval_resolved(left, env)?;

        // Short-circuit: the deciding left operand stays a dependency
        if let BinaryOp::And | BinaryOp::Or = op {
            if left.is_truthy() == (op == BinaryOp::Or) {
                return Ok(left);
            }
            let right = self.eval_resolved(right, env)?;
            return Ok(right.add_deps(&left.all_deps()));
        }

        let right = self.eval_resolved(right, env)?;
        let deps = {
            let mut deps = left.all_deps();
            deps.extend(&right.all_deps());
            deps
        };

        match op {
            BinaryOp::Eq | BinaryOp::Ne => {
                let equal = left.canonical() == right.canonical();
                Ok(Value::bool(equal == (op == BinaryOp::Eq)).add_deps(&deps))
            }
            BinaryOp::In | BinaryOp::NotIn => {
                let needle = left.canonical();
                let found = match &right.kind {
                    ValueKind::List(items) => items.iter().any(|v| v.canonical() == needle),
                    ValueKind::Tuple(fields) => fields.iter().any(|(_, v)| v.canonical() == needle),
                    _ => {
                        return Err(SheetError::type_error(format!(
                            "'{}' needs a list or tuple, got {}",
                            op,
                            right.type_name()
                        )))
                    }
                };
                Ok(Value::bool(found == (op == BinaryOp::In)).add_deps(&deps))
            }
            BinaryOp::Add if left.is_list() && right.is_list() => left.merge(right),
            BinaryOp::Add if left.is_tuple() && right.is_tuple() => left.merge(right),
            _ => match (left.as_scalar(), right.as_scalar()) {
                (Some(l), Some(r)) => Ok(Value::scalar(apply_binary(op, l, r)?).add_deps(&deps)),
                _ => Err(SheetError::type_error(format!(
                    "cannot apply '{}' to {} and {}",
                    op,
                    left.type_name(),
                    right.type_name()
                ))),
            },
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, env: &Env) -> Result<Value, SheetError> {
        let value = self.eval_resolved(operand, env)?;
        let result = match (op, value.as_scalar()) {
            (UnaryOp::Neg, Some(Scalar::Number(n))) => Scalar::Number(-n),
            (UnaryOp::Not, Some(Scalar::Bool(b))) => Scalar::Bool(!b),
            (UnaryOp::Neg, _) => {
                return Err(SheetError::type_error(format!("cannot negate {}", value.type_name())))
            }
            (UnaryOp::Not, _) => {
                return Err(SheetError::type_error(format!(
                    "'!' needs a boolean, got {}",
                    value.type_name()
                )))
            }
        };
        Ok(Value::scalar(result).add_deps(&value.all_deps()))
    }

    // =========================================================================
    // Select / Project
    // =========================================================================

    fn select(&mut self, target: Value, key: &Selector) -> Result<Value, SheetError> {
        if let ValueKind::TableRef(table_ref) = &target.kind {
            if let Some(bound) = self.bind_axis(table_ref, key)? {
                trace!(reference = %bound, "lazy select");
                return Ok(Value::table_ref(bound).add_deps(&target.deps));
            }
        }
        let target = self.resolve(target)?;
        index(target, key)
    }

    /// Bind a still-open axis of a reference instead of materializing it
    fn bind_axis(&self, table_ref: &TableRef, key: &Selector) -> Result<Option<TableRef>, SheetError> {
        let shape = self.shape(&table_ref.table)?;
        let mut bound = table_ref.clone();

        match key {
            Selector::Name(column) => match &table_ref.col {
                ColSel::One(_) => return Ok(None),
                ColSel::All if shape.has_column(column) => bound.col = ColSel::One(column.clone()),
                ColSel::Many(columns) if columns.contains(column) => {
                    bound.col = ColSel::One(column.clone())
                }
                _ => return Err(SheetError::MissingField(column.clone())),
            },
            Selector::Index(i) => match &table_ref.row {
                RowSel::One(_) => return Ok(None),
                RowSel::All if *i < shape.rows => bound.row = RowSel::One(*i),
                RowSel::All => {
                    return Err(SheetError::IndexOutOfBounds {
                        index: *i,
                        len: shape.rows,
                    })
                }
                RowSel::Many(rows) => match rows.get(*i) {
                    Some(row) => bound.row = RowSel::One(*row),
                    None => {
                        return Err(SheetError::IndexOutOfBounds {
                            index: *i,
                            len: rows.len(),
                        })
                    }
                },
            },
        }
        Ok(Some(bound))
    }

    fn project(&mut self, target: Value, keys: &[Selector]) -> Result<Value, SheetError> {
        let names: Option<Vec<String>> = keys
            .iter()
            .map(|k| match k {
                Selector::Name(n) => Some(n.clone()),
                Selector::Index(_) => None,
            })
            .collect();
        let indices: Option<Vec<usize>> = keys
            .iter()
            .map(|k| match k {
                Selector::Index(i) => Some(*i),
                Selector::Name(_) => None,
            })
            .collect();

        if let ValueKind::TableRef(table_ref) = &target.kind {
            let shape = self.shape(&table_ref.table)?;
            let mut bound = table_ref.clone();
            let lazy = match (&names, &indices, &table_ref.col, &table_ref.row) {
                (Some(names), _, ColSel::All | ColSel::Many(_), _) => {
                    let available = table_ref.col.names(&shape.columns);
                    if let Some(missing) = names.iter().find(|n| !available.contains(n)) {
                        return Err(SheetError::MissingField(missing.clone()));
                    }
                    bound.col = ColSel::Many(names.clone());
                    true
                }
                (_, Some(indices), _, RowSel::All | RowSel::Many(_)) => {
                    let available = table_ref.row.indices(shape.rows);
                    let mut rows = Vec::with_capacity(indices.len());
                    for i in indices {
                        match available.get(*i) {
                            Some(row) => rows.push(*row),
                            None => {
                                return Err(SheetError::IndexOutOfBounds {
                                    index: *i,
                                    len: available.len(),
                                })
                            }
                        }
                    }
                    bound.row = RowSel::Many(rows);
                    true
                }
                _ => false,
            };
            if lazy {
                return Ok(Value::table_ref(bound).add_deps(&target.deps));
            }
        }

        let target = self.resolve(target)?;
        match (names, indices) {
            (_, Some(indices)) => {
                let deps = target.deps.clone();
                let mut items = Vec::with_capacity(indices.len());
                for i in indices {
                    items.push(index(target.clone(), &Selector::Index(i))?);
                }
                Ok(Value::list(items).add_deps(&deps))
            }
            (Some(names), None) => narrow(target, &names),
            (None, None) => Err(SheetError::type_error(
                "cannot mix names and indices in a projection",
            )),
        }
    }

    // =========================================================================
    // Comprehensions and filters
    // =========================================================================

    /// Elements of an iterable value; whole-table references give one lazy
    /// reference per row
    fn elements(&mut self, value: Value) -> Result<(Vec<Value>, DepSet), SheetError> {
        if let ValueKind::TableRef(table_ref) = &value.kind {
            if !matches!(table_ref.row, RowSel::One(_)) {
                let shape = self.shape(&table_ref.table)?;
                let (rows, mut deps) = row_refs(table_ref, &shape);
                deps.extend(&value.deps);
                return Ok((rows, deps));
            }
        }
        let value = self.resolve(value)?;
        match value.kind {
            ValueKind::List(items) => Ok((items, value.deps)),
            _ => Err(SheetError::type_error(format!(
                "cannot iterate over {}",
                Value::new(value.kind).type_name()
            ))),
        }
    }

    fn generate(
        &mut self,
        body: &Expr,
        bindings: &[(String, Expr)],
        cond: Option<&Expr>,
        env: &Env,
    ) -> Result<Value, SheetError> {
        let mut deps = DepSet::new();
        let mut envs = vec![env.clone()];

        // Cartesian product of all sources
        for (name, source) in bindings {
            let source = self.eval(source, env)?;
            let (items, source_deps) = self.elements(source)?;
            deps.extend(&source_deps);

            let mut next = Vec::with_capacity(envs.len() * items.len());
            for bound in &envs {
                for item in &items {
                    next.push(bound.with(name.as_str(), item.clone()));
                }
            }
            envs = next;
        }

        let mut results = Vec::new();
        for binding in &envs {
            let keep = match cond {
                Some(cond) => self.eval_resolved(cond, binding)?,
                None => Value::bool(true),
            };
            match keep.as_bool() {
                Some(true) => results.push(self.eval(body, binding)?.add_deps(&keep.all_deps())),
                Some(false) => deps.extend(&keep.all_deps()),
                None => {
                    return Err(SheetError::type_error(format!(
                        "comprehension condition must be a boolean, got {}",
                        keep.type_name()
                    )))
                }
            }
        }

        Ok(Value {
            kind: ValueKind::List(results),
            deps,
        })
    }

    fn filter(&mut self, target: Value, pred: &Expr, env: &Env) -> Result<Value, SheetError> {
        let (rows, mut deps) = self.elements(target)?;
        let mut kept = Vec::new();

        for row in rows {
            let mut row_env = env.clone();
            match &row.kind {
                ValueKind::TableRef(table_ref) => {
                    let RowSel::One(index) = table_ref.row else {
                        return Err(SheetError::type_error("filter needs rows"));
                    };
                    let shape = self.shape(&table_ref.table)?;
                    for column in table_ref.col.names(&shape.columns) {
                        let cell = TableRef {
                            table: table_ref.table.clone(),
                            row: RowSel::One(index),
                            col: ColSel::One(column.clone()),
                        };
                        row_env.bind(column, Value::table_ref(cell).add_deps(&row.deps));
                    }
                }
                ValueKind::Tuple(fields) => {
                    for (name, value) in fields {
                        row_env.bind(name.clone(), value.clone().add_deps(&row.deps));
                    }
                }
                _ => {
                    return Err(SheetError::type_error(format!(
                        "filter needs a table or a list of tuples, got a list of {}",
                        row.type_name()
                    )))
                }
            }

            let keep = self.eval_resolved(pred, &row_env)?;
            match keep.as_bool() {
                Some(true) => kept.push(row.add_deps(&keep.all_deps())),
                Some(false) => deps.extend(&keep.all_deps()),
                None => {
                    return Err(SheetError::type_error(format!(
                        "filter predicate must be a boolean, got {}",
                        keep.type_name()
                    )))
                }
            }
        }

        Ok(Value {
            kind: ValueKind::List(kept),
            deps,
        })
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call(&mut self, name: &str, args: &[Expr], env: &Env) -> Result<Value, SheetError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, env)?);
        }

        if let Some(builtin) = functions::lookup(name) {
            return builtin(self, values, env);
        }

        let user = self.user;
        match self.ctx.call_script(name, user, &values) {
            Some(result) => result,
            None => Err(SheetError::UndefinedFunction(name.to_string())),
        }
    }
}

/// Eager indexing of a resolved value
fn index(target: Value, key: &Selector) -> Result<Value, SheetError> {
    let Value { kind, deps } = target;
    let item = match (kind, key) {
        (ValueKind::List(items), Selector::Index(i)) => {
            let len = items.len();
            items
                .into_iter()
                .nth(*i)
                .ok_or(SheetError::IndexOutOfBounds { index: *i, len })?
        }
        (ValueKind::Tuple(fields), Selector::Name(name)) => fields
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .ok_or_else(|| SheetError::MissingField(name.clone()))?,
        // Column broadcast over a list of tuples
        (ValueKind::List(items), Selector::Name(_)) => {
            let mut column = Vec::with_capacity(items.len());
            for item in items {
                column.push(index(item, key)?);
            }
            Value::list(column)
        }
        (kind, key) => {
            return Err(SheetError::type_error(format!(
                "cannot select '{}' from {}",
                key,
                Value::new(kind).type_name()
            )))
        }
    };
    Ok(item.add_deps(&deps))
}

/// Keep only the named fields of a tuple, or of every tuple in a list
fn narrow(target: Value, names: &[String]) -> Result<Value, SheetError> {
    let Value { kind, deps } = target;
    let narrowed = match kind {
        ValueKind::Tuple(fields) => {
            let mut kept = Vec::with_capacity(names.len());
            for name in names {
                match fields.iter().find(|(k, _)| k == name) {
                    Some((k, v)) => kept.push((k.clone(), v.clone())),
                    None => return Err(SheetError::MissingField(name.clone())),
                }
            }
            Value::tuple(kept)
        }
        ValueKind::List(items) => {
            let mut rows = Vec::with_capacity(items.len());
            for item in items {
                rows.push(narrow(item, names)?);
            }
            Value::list(rows)
        }
        other => {
            return Err(SheetError::type_error(format!(
                "cannot project fields of {}",
                Value::new(other).type_name()
            )))
        }
    };
    Ok(narrowed.add_deps(&deps))
}

/// Operator table for scalar operands
fn apply_binary(op: BinaryOp, left: &Scalar, right: &Scalar) -> Result<Scalar, SheetError> {
    use Scalar::{Bool, Number, Str};

    let result = match (op, left, right) {
        (BinaryOp::Add, Number(a), Number(b)) => Number(a + b),
        (BinaryOp::Add, Str(a), b) => Str(format!("{}{}", a, b)),
        (BinaryOp::Add, a, Str(b)) => Str(format!("{}{}", a, b)),
        (BinaryOp::Sub, Number(a), Number(b)) => Number(a - b),
        (BinaryOp::Mul, Number(a), Number(b)) => Number(a * b),
        (BinaryOp::Div, Number(a), Number(b)) => Number(a / b),
        (BinaryOp::Mod, Number(a), Number(b)) => Number(a % b),

        (BinaryOp::Lt, Number(a), Number(b)) => Bool(a < b),
        (BinaryOp::Le, Number(a), Number(b)) => Bool(a <= b),
        (BinaryOp::Gt, Number(a), Number(b)) => Bool(a > b),
        (BinaryOp::Ge, Number(a), Number(b)) => Bool(a >= b),
        (BinaryOp::Lt, Str(a), Str(b)) => Bool(a < b),
        (BinaryOp::Le, Str(a), Str(b)) => Bool(a <= b),
        (BinaryOp::Gt, Str(a), Str(b)) => Bool(a > b),
        (BinaryOp::Ge, Str(a), Str(b)) => Bool(a >= b),

        _ => {
            return Err(SheetError::type_error(format!(
                "cannot apply '{}' to {} and {}",
                op,
                left.type_name(),
                right.type_name()
            )))
        }
    };

    if let Number(n) = result {
        if !n.is_finite() {
            return Err(SheetError::type_error(format!(
                "'{}' produced a non-finite number",
                op
            )));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eval_str, MockSheet};
    use websheet_core::{CellCoord, Dep, DepKey};

    fn sheet() -> MockSheet {
        MockSheet::new().table(
            "T",
            &["name", "score"],
            vec![
                vec![Value::string("ann"), Value::number(3.0)],
                vec![Value::string("ben"), Value::number(7.0)],
                vec![Value::string("cy"), Value::number(5.0)],
            ],
        )
    }

    fn eval(input: &str) -> Result<Value, SheetError> {
        eval_str(&mut sheet(), "alice", input)
    }

    fn canon(input: &str) -> String {
        eval(input).unwrap().canonical()
    }

    fn cell_key(row: usize, column: &str) -> DepKey {
        Dep::cell(CellCoord::new("T", row, column)).key()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(canon("1 + 2 * 3"), "7");
        assert_eq!(canon("(1 + 2) * 3"), "9");
        assert_eq!(canon("7 % 4"), "3");
        assert_eq!(canon("-(2 - 5)"), "3");
        assert_eq!(canon("\"a\" + 1"), "\"a1\"");
    }

    #[test]
    fn test_non_finite_is_error() {
        assert!(matches!(eval("1 / 0"), Err(SheetError::RuntimeType(_))));
        assert!(matches!(eval("1 - true"), Err(SheetError::RuntimeType(_))));
        assert!(matches!(eval("!1"), Err(SheetError::RuntimeType(_))));
    }

    #[test]
    fn test_logic_short_circuit() {
        assert_eq!(canon("false && nope"), "false");
        assert_eq!(canon("0 || \"x\""), "\"x\"");
        assert_eq!(canon("null || false"), "false");

        let v = eval("T.0.score > 1 && true").unwrap();
        assert_eq!(v.canonical(), "true");
        assert!(v.deps.contains_key(&cell_key(0, "score")));
    }

    #[test]
    fn test_equality_and_membership() {
        assert_eq!(canon("1 == 1"), "true");
        assert_eq!(canon("\"1\" == 1"), "false");
        assert_eq!(canon("[1, 2] == [1, 2]"), "true");
        assert_eq!(canon("{a: 1, b: 2} == {b: 2, a: 1}"), "true");
        assert_eq!(canon("2 in [1, 2]"), "true");
        assert_eq!(canon("\"ben\" in T.name"), "true");
        assert_eq!(canon("3 not in {a: 3}"), "false");
        assert!(eval("1 in 2").is_err());
    }

    #[test]
    fn test_merge() {
        assert_eq!(canon("[1] + [2, 3]"), "[1, 2, 3]");
        assert_eq!(eval("{a: 1} + {b: 2, a: 3}").unwrap().to_string(), "{a: 3, b: 2}");
        assert!(eval("[1] + {a: 1}").is_err());
    }

    #[test]
    fn test_if() {
        assert_eq!(canon("if 1 < 2 then \"y\" else \"n\""), "\"y\"");
        assert!(matches!(eval("if 1 then 2 else 3"), Err(SheetError::RuntimeType(_))));
        let v = eval("if T.1.score > 5 then 1 else 2").unwrap();
        assert!(v.deps.contains_key(&cell_key(1, "score")));
    }

    #[test]
    fn test_type_errors_name_types_not_values() {
        for input in [
            "if T.0.name then 1 else 2",
            "{x for x in [1] when T.1.name}",
            "T[T.2.name]",
            "sum(T.name)",
        ] {
            let message = eval(input).unwrap_err().to_string();
            assert!(message.contains("string"), "{}: {}", input, message);
            for name in ["ann", "ben", "cy"] {
                assert!(!message.contains(name), "{}: {}", input, message);
            }
        }
    }

    #[test]
    fn test_lazy_select() {
        let mut ctx = sheet();
        let v = {
            let expr = crate::parser::parse_cell("T.1", "test").unwrap();
            Evaluator::new(&mut ctx, "alice").eval(&expr, &Env::new()).unwrap()
        };
        let table_ref = v.as_table_ref().unwrap();
        assert_eq!(table_ref.row, RowSel::One(1));
        assert_eq!(table_ref.col, ColSel::All);

        assert_eq!(canon("T.1.name"), "\"ben\"");
        assert_eq!(canon("T.name.2"), "\"cy\"");
        assert_eq!(canon("T.score"), "[3, 7, 5]");
        assert_eq!(canon("T.2"), "{name: \"cy\", score: 5}");
        assert!(matches!(eval("T.9"), Err(SheetError::IndexOutOfBounds { index: 9, len: 3 })));
        assert!(matches!(eval("T.nope"), Err(SheetError::MissingField(_))));
    }

    #[test]
    fn test_eager_select() {
        assert_eq!(canon("[10, 20].1"), "20");
        assert_eq!(canon("{a: 1}.a"), "1");
        assert_eq!(canon("[{a: 1}, {a: 2}].a"), "[1, 2]");
        assert!(matches!(eval("[1].3"), Err(SheetError::IndexOutOfBounds { index: 3, len: 1 })));
        assert!(matches!(eval("{a: 1}.b"), Err(SheetError::MissingField(_))));
    }

    #[test]
    fn test_project() {
        assert_eq!(canon("T{0, 2}.name"), "[\"ann\", \"cy\"]");
        assert_eq!(canon("T.0{name}"), "{name: \"ann\"}");
        assert_eq!(canon("[5, 6, 7]{0, 2}"), "[5, 7]");
        assert_eq!(canon("{a: 1, b: 2, c: 3}{c, a}"), "{a: 1, c: 3}");
        assert_eq!(canon("[{a: 1, b: 2}]{b}"), "[{b: 2}]");
        assert!(eval("T{name, 0}").is_err());
    }

    #[test]
    fn test_comprehension() {
        let v = eval("{x * 2 for x in [1, 2, 3] when x > 1}").unwrap();
        assert_eq!(v.canonical(), "[4, 6]");

        assert_eq!(canon("{[x, y] for x in [1, 2], y in [\"a\"]}"), "[[1, \"a\"], [2, \"a\"]]");
        assert_eq!(canon("{r.name for r in T when r.score > 4}"), "[\"ben\", \"cy\"]");
        assert!(eval("{x for x in [1] when 1}").is_err());

        // each element depends on its source cell and on the condition
        let v = eval("{r.score for r in T when r.score > 4}").unwrap();
        let items = v.as_list().unwrap();
        assert!(items[0].all_deps().contains_key(&cell_key(1, "score")));
        assert!(!items[0].all_deps().contains_key(&cell_key(2, "score")));
        // rejected rows still count for the list as a whole
        assert!(v.deps.contains_key(&cell_key(0, "score")));
        assert!(v.deps.contains_key(&DepKey::Row("T".into(), "name".into())));
    }

    #[test]
    fn test_filter() {
        assert_eq!(canon("T[score > 4].name"), "[\"ben\", \"cy\"]");
        assert_eq!(canon("[{a: 1}, {a: 5}][a > 2]"), "[{a: 5}]");
        assert!(eval("T[score]").is_err());
        assert!(eval("[1, 2][a > 1]").is_err());
    }

    #[test]
    fn test_identifiers() {
        assert!(matches!(eval("nope"), Err(SheetError::UndefinedIdentifier(_))));
        assert!(matches!(eval("nope(1)"), Err(SheetError::UndefinedFunction(_))));

        let mut ctx = sheet();
        let expr = crate::parser::parse_cell("x + 1", "test").unwrap();
        let mut env = Env::new();
        env.bind("x", Value::number(41.0));
        let v = Evaluator::new(&mut ctx, "alice").eval(&expr, &env).unwrap();
        assert_eq!(v.canonical(), "42");
    }
}
