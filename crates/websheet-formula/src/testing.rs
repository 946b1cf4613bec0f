//! In-memory sheet double for formula tests.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};

use crate::context::{Env, SheetContext, TableShape};
use crate::evaluator::Evaluator;
use crate::parser::parse_cell;
use websheet_core::{CellCoord, Dep, SheetError, Value};

struct MockTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

pub struct MockSheet {
    tables: HashMap<String, MockTable>,
    hidden: HashSet<(String, CellCoord)>,
    pub mails: Vec<(String, String, String)>,
    pub now: DateTime<Utc>,
}

impl MockSheet {
    pub fn new() -> Self {
        MockSheet {
            tables: HashMap::new(),
            hidden: HashSet::new(),
            mails: Vec::new(),
            now: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    pub fn table(mut self, name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.tables.insert(
            name.to_string(),
            MockTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
        self
    }

    /// Make `coord` unreadable for `user`
    pub fn hide(mut self, user: &str, coord: CellCoord) -> Self {
        self.hidden.insert((user.to_string(), coord));
        self
    }
}

impl SheetContext for MockSheet {
    fn table_shape(&self, table: &str) -> Option<TableShape> {
        self.tables.get(table).map(|t| TableShape {
            rows: t.rows.len(),
            columns: t.columns.clone(),
        })
    }

    fn cell_value(&mut self, coord: &CellCoord) -> Result<Value, SheetError> {
        let table = self
            .tables
            .get(&coord.table)
            .ok_or_else(|| SheetError::NoSuchTable(coord.table.clone()))?;
        let col = table
            .columns
            .iter()
            .position(|c| *c == coord.column)
            .ok_or_else(|| SheetError::MissingField(coord.column.clone()))?;
        let value = table
            .rows
            .get(coord.row)
            .and_then(|row| row.get(col))
            .cloned()
            .ok_or(SheetError::IndexOutOfBounds {
                index: coord.row,
                len: table.rows.len(),
            })?;
        Ok(value.add_dep(Dep::cell(coord.clone())))
    }

    fn can_read(&mut self, user: &str, coord: &CellCoord) -> Result<bool, SheetError> {
        Ok(!self.hidden.contains(&(user.to_string(), coord.clone())))
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn send_mail(&mut self, to: &str, subject: &str, body: &str) -> Result<(), SheetError> {
        self.mails
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Parse and evaluate `src` outside any cell, resolved
pub fn eval_str(ctx: &mut MockSheet, user: &str, src: &str) -> Result<Value, SheetError> {
    let expr = parse_cell(src, "test")?;
    Evaluator::new(ctx, user).eval_resolved(&expr, &Env::new())
}
