use chrono::{DateTime, Utc};
use std::collections::HashMap;

use websheet_core::{CellCoord, SheetError, Value};

/// Row count and column names of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableShape {
    pub rows: usize,
    pub columns: Vec<String>,
}

impl TableShape {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Callbacks from the evaluator into the sheet that owns the data.
///
/// `cell_value` goes through the output cache and returns the resolved cell
/// value carrying a dependency on the cell itself.
pub trait SheetContext {
    fn table_shape(&self, table: &str) -> Option<TableShape>;

    fn cell_value(&mut self, coord: &CellCoord) -> Result<Value, SheetError>;

    fn can_read(&mut self, user: &str, coord: &CellCoord) -> Result<bool, SheetError>;

    fn now(&self) -> DateTime<Utc>;

    fn send_mail(&mut self, to: &str, subject: &str, body: &str) -> Result<(), SheetError>;

    /// Helper scripts; `None` means no script of that name exists
    fn call_script(
        &mut self,
        _name: &str,
        _user: &str,
        _args: &[Value],
    ) -> Option<Result<Value, SheetError>> {
        None
    }
}

/// Variable bindings visible to a formula
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: HashMap<String, Value>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// A copy of this environment with one more binding
    pub fn with(&self, name: impl Into<String>, value: Value) -> Env {
        let mut env = self.clone();
        env.bind(name, value);
        env
    }

    /// String value of a synthetic binding such as `cellOwner`
    pub fn str_var(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Coordinate of the cell being evaluated, when in a cell context
    pub fn current_cell(&self) -> Option<CellCoord> {
        let table = self.str_var("tableName")?;
        let row = self.get("rowIndex")?.as_number()?;
        let column = self.str_var("colName")?;
        if row < 0.0 {
            return None;
        }
        Some(CellCoord::new(table, row as usize, column))
    }
}
