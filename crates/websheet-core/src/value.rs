use serde::Serialize;
use std::fmt;

use crate::coord::{CellCoord, ColSel, RowSel};
use crate::dep::{Dep, DepSet};
use crate::error::SheetError;

/// Sentinel shown in place of anything the reader may not see
pub const CENSORED: &str = "[[censored]]";

/// Primitive runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Scalar {
    /// JS-like truthiness: `false`, `0`, `null` and `""` are falsy
    pub fn is_truthy(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Bool(b) => *b,
            Scalar::Number(n) => *n != 0.0 && !n.is_nan(),
            Scalar::Str(s) => !s.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "boolean",
            Scalar::Number(_) => "number",
            Scalar::Str(_) => "string",
        }
    }

    /// Canonical text; strings are quoted so `1` and `"1"` stay distinct
    pub fn canonical(&self) -> String {
        match self {
            Scalar::Str(s) => format!("{:?}", s),
            other => other.to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Number(n) => write!(f, "{}", format_number(*n)),
            Scalar::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Lazy pointer into a table; not resolved to data until needed
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub table: String,
    pub row: RowSel,
    pub col: ColSel,
}

impl TableRef {
    /// Whole-table reference (`row` and `col` both unbound)
    pub fn whole(table: impl Into<String>) -> Self {
        TableRef {
            table: table.into(),
            row: RowSel::All,
            col: ColSel::All,
        }
    }

    pub fn cell(coord: &CellCoord) -> Self {
        TableRef {
            table: coord.table.clone(),
            row: RowSel::One(coord.row),
            col: ColSel::One(coord.column.clone()),
        }
    }

    /// The single coordinate this reference points at, if fully bound
    pub fn as_cell(&self) -> Option<CellCoord> {
        match (&self.row, &self.col) {
            (RowSel::One(r), ColSel::One(c)) => Some(CellCoord::new(self.table.clone(), *r, c.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.table, self.row, self.col)
    }
}

/// The four runtime value shapes
#[derive(Debug, Clone)]
pub enum ValueKind {
    Scalar(Scalar),
    TableRef(TableRef),
    List(Vec<Value>),
    /// Field order is kept for display; equality ignores it
    Tuple(Vec<(String, Value)>),
}

/// A runtime value together with the dependencies it was derived from
#[derive(Debug, Clone)]
pub struct Value {
    pub kind: ValueKind,
    pub deps: DepSet,
}

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Value {
            kind,
            deps: DepSet::new(),
        }
    }

    pub fn scalar(value: Scalar) -> Self {
        Value::new(ValueKind::Scalar(value))
    }

    pub fn null() -> Self {
        Value::scalar(Scalar::Null)
    }

    pub fn bool(b: bool) -> Self {
        Value::scalar(Scalar::Bool(b))
    }

    pub fn number(n: f64) -> Self {
        Value::scalar(Scalar::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::scalar(Scalar::Str(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::new(ValueKind::List(items))
    }

    pub fn tuple(fields: Vec<(String, Value)>) -> Self {
        Value::new(ValueKind::Tuple(fields))
    }

    pub fn table_ref(table_ref: TableRef) -> Self {
        Value::new(ValueKind::TableRef(table_ref))
    }

    /// Merge the dependencies of `other` into this value's own set
    pub fn add_deps(mut self, other: &DepSet) -> Self {
        self.deps.extend(other);
        self
    }

    pub fn add_dep(mut self, dep: Dep) -> Self {
        self.deps.insert(dep);
        self
    }

    /// Merge the own dependencies of every value in `others`
    pub fn add_deps_of<'a>(mut self, others: impl IntoIterator<Item = &'a Value>) -> Self {
        for other in others {
            self.deps.extend(&other.deps);
        }
        self
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match &self.kind {
            ValueKind::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.as_scalar() {
            Some(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.as_scalar() {
            Some(Scalar::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.as_scalar() {
            Some(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_table_ref(&self) -> Option<&TableRef> {
        match &self.kind {
            ValueKind::TableRef(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match &self.kind {
            ValueKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[(String, Value)]> {
        match &self.kind {
            ValueKind::Tuple(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, ValueKind::List(_))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self.kind, ValueKind::Tuple(_))
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_tuple()?
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ValueKind::Scalar(s) => s.type_name(),
            ValueKind::TableRef(_) => "table reference",
            ValueKind::List(_) => "list",
            ValueKind::Tuple(_) => "tuple",
        }
    }

    /// JS-like truthiness; lists, tuples and references are truthy
    pub fn is_truthy(&self) -> bool {
        match &self.kind {
            ValueKind::Scalar(s) => s.is_truthy(),
            _ => true,
        }
    }

    /// Read-permission result; anything but a boolean is an error
    pub fn as_permission(&self) -> Result<bool, SheetError> {
        self.as_bool().ok_or_else(|| {
            SheetError::type_error(format!(
                "permission must be a boolean, got {}",
                self.type_name()
            ))
        })
    }

    /// Canonical text form, used as the equality key
    pub fn canonical(&self) -> String {
        match &self.kind {
            ValueKind::Scalar(s) => s.canonical(),
            ValueKind::TableRef(t) => format!("&{}", t),
            ValueKind::List(items) => {
                let items: Vec<String> = items.iter().map(Value::canonical).collect();
                format!("[{}]", items.join(", "))
            }
            ValueKind::Tuple(fields) => {
                let mut fields: Vec<(&String, String)> =
                    fields.iter().map(|(k, v)| (k, v.canonical())).collect();
                fields.sort_by(|a, b| a.0.cmp(b.0));
                let fields: Vec<String> = fields
                    .into_iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                format!("{{{}}}", fields.join(", "))
            }
        }
    }

    /// Union of the dependencies of this value and everything nested in it
    pub fn all_deps(&self) -> DepSet {
        let mut deps = DepSet::new();
        self.collect_deps(&mut deps);
        deps
    }

    fn collect_deps(&self, into: &mut DepSet) {
        into.extend(&self.deps);
        match &self.kind {
            ValueKind::List(items) => items.iter().for_each(|v| v.collect_deps(into)),
            ValueKind::Tuple(fields) => fields.iter().for_each(|(_, v)| v.collect_deps(into)),
            ValueKind::Scalar(_) | ValueKind::TableRef(_) => {}
        }
    }

    /// Visit the dependency set of this value and of every nested value
    pub fn visit_deps_mut(&mut self, f: &mut dyn FnMut(&mut DepSet)) {
        f(&mut self.deps);
        match &mut self.kind {
            ValueKind::List(items) => items.iter_mut().for_each(|v| v.visit_deps_mut(f)),
            ValueKind::Tuple(fields) => fields.iter_mut().for_each(|(_, v)| v.visit_deps_mut(f)),
            ValueKind::Scalar(_) | ValueKind::TableRef(_) => {}
        }
    }

    /// Same canonical text and same dependency set
    pub fn same_as(&self, other: &Value) -> bool {
        self.canonical() == other.canonical() && self.all_deps() == other.all_deps()
    }

    /// `+` on two lists (concatenation) or two tuples (right side wins)
    pub fn merge(self, other: Value) -> Result<Value, SheetError> {
        let mut deps = self.deps;
        deps.extend(&other.deps);
        let kind = match (self.kind, other.kind) {
            (ValueKind::List(mut a), ValueKind::List(b)) => {
                a.extend(b);
                ValueKind::List(a)
            }
            (ValueKind::Tuple(mut a), ValueKind::Tuple(b)) => {
                for (k, v) in b {
                    match a.iter_mut().find(|(existing, _)| *existing == k) {
                        Some(slot) => slot.1 = v,
                        None => a.push((k, v)),
                    }
                }
                ValueKind::Tuple(a)
            }
            (a, b) => {
                return Err(SheetError::type_error(format!(
                    "cannot merge {} and {}",
                    Value::new(a).type_name(),
                    Value::new(b).type_name()
                )))
            }
        };
        Ok(Value { kind, deps })
    }

    /// Debug rendering that ignores permissions
    pub fn uncensored(&self) -> Rendered {
        match &self.kind {
            ValueKind::Scalar(s) => Rendered::from_scalar(s),
            ValueKind::TableRef(t) => Rendered::Text(format!("&{}", t)),
            ValueKind::List(items) => Rendered::List(items.iter().map(Value::uncensored).collect()),
            ValueKind::Tuple(fields) => Rendered::Tuple(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.uncensored()))
                    .collect(),
            ),
        }
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::scalar(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uncensored())
    }
}

/// Display tree handed to readers after censoring
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Rendered {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Rendered>),
    Tuple(Vec<(String, Rendered)>),
    Censored,
    /// Error text is only carried in debug mode
    Error(Option<String>),
    /// Not evaluated yet (bulk reads without eager evaluation)
    Pending,
}

impl Rendered {
    pub fn from_scalar(s: &Scalar) -> Self {
        match s {
            Scalar::Null => Rendered::Null,
            Scalar::Bool(b) => Rendered::Bool(*b),
            Scalar::Number(n) => Rendered::Number(*n),
            Scalar::Str(s) => Rendered::Text(s.clone()),
        }
    }

    pub fn is_censored(&self) -> bool {
        matches!(self, Rendered::Censored)
    }

    /// String payload, if this is visible text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Rendered::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rendered::Null => write!(f, "null"),
            Rendered::Bool(b) => write!(f, "{}", b),
            Rendered::Number(n) => write!(f, "{}", format_number(*n)),
            Rendered::Text(s) => write!(f, "{}", s),
            Rendered::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Rendered::Tuple(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Rendered::Censored => write!(f, "{}", CENSORED),
            Rendered::Error(None) => write!(f, "[[error]]"),
            Rendered::Error(Some(msg)) => write!(f, "[[error: {}]]", msg),
            Rendered::Pending => write!(f, "[[unevaluated]]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(row: usize, column: &str) -> Dep {
        Dep::cell(CellCoord::new("T", row, column))
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::bool(false).is_truthy());
        assert!(!Value::number(0.0).is_truthy());
        assert!(!Value::null().is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("x").is_truthy());
        assert!(Value::list(vec![]).is_truthy());
        assert!(Value::tuple(vec![]).is_truthy());
    }

    #[test]
    fn test_canonical_form() {
        assert_eq!(Value::number(2.0).canonical(), "2");
        assert_eq!(Value::number(2.5).canonical(), "2.5");
        assert_eq!(Value::string("a").canonical(), "\"a\"");
        assert_eq!(
            Value::list(vec![Value::number(1.0), Value::bool(true)]).canonical(),
            "[1, true]"
        );
        let a = Value::tuple(vec![
            ("b".into(), Value::number(1.0)),
            ("a".into(), Value::number(2.0)),
        ]);
        let b = Value::tuple(vec![
            ("a".into(), Value::number(2.0)),
            ("b".into(), Value::number(1.0)),
        ]);
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.to_string(), "{b: 1, a: 2}");
    }

    #[test]
    fn test_all_deps_collects_nested() {
        let inner = Value::number(1.0).add_dep(dep(0, "a"));
        let list = Value::list(vec![inner, Value::number(2.0).add_dep(dep(1, "a"))]).add_dep(dep(2, "b"));
        assert_eq!(list.all_deps().len(), 3);
        assert_eq!(list.deps.len(), 1);
    }

    #[test]
    fn test_same_as_compares_deps() {
        let a = Value::number(1.0).add_dep(dep(0, "a"));
        let b = Value::number(1.0).add_dep(dep(0, "a"));
        let c = Value::number(1.0).add_dep(dep(0, "b"));
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_merge() {
        let l = Value::list(vec![Value::number(1.0)]).add_dep(dep(0, "a"));
        let r = Value::list(vec![Value::number(2.0)]);
        let merged = l.merge(r).unwrap();
        assert_eq!(merged.canonical(), "[1, 2]");
        assert_eq!(merged.deps.len(), 1);

        let l = Value::tuple(vec![("a".into(), Value::number(1.0)), ("b".into(), Value::number(2.0))]);
        let r = Value::tuple(vec![("b".into(), Value::number(3.0))]);
        assert_eq!(l.merge(r).unwrap().to_string(), "{a: 1, b: 3}");

        assert!(Value::list(vec![]).merge(Value::tuple(vec![])).is_err());
    }

    #[test]
    fn test_as_permission() {
        assert_eq!(Value::bool(true).as_permission(), Ok(true));
        assert!(matches!(
            Value::number(1.0).as_permission(),
            Err(SheetError::RuntimeType(_))
        ));
    }

    #[test]
    fn test_rendered_display() {
        assert_eq!(Rendered::Censored.to_string(), CENSORED);
        assert_eq!(Rendered::Error(None).to_string(), "[[error]]");
        assert_eq!(
            Rendered::List(vec![Rendered::Number(1.0), Rendered::Censored]).to_string(),
            "[1, [[censored]]]"
        );
    }
}
