//! Operations exposed to transports and the console.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use websheet_core::{CellCoord, Dep, Rendered, SheetError, Value, CENSORED, OWNER_COLUMN};
use websheet_formula::{censor, evaluate_formula, functions, Env, SheetContext};

use crate::cache::CellState;
use crate::sheet::{Sheet, User};
use crate::table::{ColumnMeta, PermKind, PermTarget, Table};
use crate::trigger::TriggerEvent;

/// Censored, evaluated view of a table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputTable {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Rendered>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputCell {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputRow {
    pub owner: String,
    pub cells: Vec<InputCell>,
}

/// Formula sources of a table, hiding what the reader may not edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputTable {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub columns: Vec<String>,
    pub rows: Vec<InputRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub description: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub user: String,
    pub tables: Vec<String>,
}

/// Names a formula editor can complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Keywords {
    pub tables: Vec<String>,
    pub columns: Vec<String>,
    pub functions: Vec<String>,
}

pub(crate) fn check_name(kind: &str, name: &str) -> Result<(), SheetError> {
    let valid = name
        .chars()
        .next()
        .map_or(false, |c| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SheetError::InvalidArgument(format!("invalid {} name '{}'", kind, name)))
    }
}

pub(crate) fn check_columns(columns: &[String]) -> Result<(), SheetError> {
    let mut seen = BTreeSet::new();
    for column in columns {
        check_name("column", column)?;
        if column == OWNER_COLUMN || column == "row" {
            return Err(SheetError::InvalidArgument(format!(
                "'{}' is reserved",
                column
            )));
        }
        if !seen.insert(column) {
            return Err(SheetError::InvalidArgument(format!(
                "duplicate column '{}'",
                column
            )));
        }
    }
    Ok(())
}

impl Sheet {
    // =========================================================================
    // Users
    // =========================================================================

    pub fn create_user(&mut self, name: &str) -> bool {
        if self.users.contains_key(name) {
            return false;
        }
        self.users.insert(
            name.to_string(),
            User {
                name: name.to_string(),
            },
        );
        info!(user = name, "user created");
        true
    }

    /// Remove a user; the admin cannot be deleted
    pub fn delete_user(&mut self, name: &str) -> bool {
        if self.is_admin(name) || self.users.remove(name).is_none() {
            return false;
        }
        self.permissions.remove(name);
        info!(user = name, "user deleted");
        true
    }

    pub fn list_users(&self) -> Vec<UserSummary> {
        self.users
            .keys()
            .map(|user| UserSummary {
                user: user.clone(),
                tables: self
                    .tables
                    .values()
                    .filter(|t| &t.owner == user)
                    .map(|t| t.name.clone())
                    .collect(),
            })
            .collect()
    }

    // =========================================================================
    // Tables
    // =========================================================================

    pub fn list_tables(&self) -> Vec<TableSummary> {
        self.tables
            .values()
            .map(|t| TableSummary {
                name: t.name.clone(),
                description: t.description.clone(),
                owner: t.owner.clone(),
            })
            .collect()
    }

    pub fn list_keywords(&self) -> Keywords {
        let columns: BTreeSet<&String> = self.tables.values().flat_map(|t| &t.columns).collect();
        Keywords {
            tables: self.tables.keys().cloned().collect(),
            columns: columns.into_iter().cloned().collect(),
            functions: functions::NAMES.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Create an empty table owned by `user`; `false` if the name is taken
    pub fn create_table(
        &mut self,
        user: &str,
        name: &str,
        description: &str,
        columns: Vec<String>,
        meta: Option<BTreeMap<String, ColumnMeta>>,
    ) -> Result<bool, SheetError> {
        check_name("table", name)?;
        check_columns(&columns)?;
        if self.tables.contains_key(name) {
            return Ok(false);
        }

        let mut table = Table::new(name, description, user, columns);
        if let Some(meta) = meta {
            if let Some(column) = meta.keys().find(|c| !table.has_column(c)) {
                return Err(SheetError::MissingField(column.clone()));
            }
            table.meta = meta;
        }
        self.tables.insert(name.to_string(), table);

        info!(user, table = name, "table created");
        self.trigger(TriggerEvent::CreateTable {
            table: name.to_string(),
        });
        Ok(true)
    }

    pub fn delete_table(&mut self, user: &str, table: &str) -> Result<(), SheetError> {
        self.require_owner(user, table)?;
        self.tables.remove(table);

        info!(user, table, "table deleted");
        self.trigger(TriggerEvent::DeleteTable {
            table: table.to_string(),
        });
        Ok(())
    }

    /// Replace one permission formula (or an init formula)
    pub fn write_perm(
        &mut self,
        user: &str,
        table: &str,
        kind: PermKind,
        target: PermTarget,
        source: &str,
    ) -> Result<(), SheetError> {
        self.require_owner(user, table)?;
        self.table_mut(table)?
            .perms
            .set(table, kind, &target, source, user)?;

        info!(user, table, %kind, ?target, "permission written");
        self.trigger(TriggerEvent::WritePerm {
            table: table.to_string(),
            kind,
            target,
        });
        Ok(())
    }

    pub fn write_owner(
        &mut self,
        user: &str,
        table: &str,
        row: usize,
        new_owner: &str,
    ) -> Result<(), SheetError> {
        self.require_owner(user, table)?;
        let t = self.table_mut(table)?;
        let len = t.rows.len();
        let r = t
            .rows
            .get_mut(row)
            .ok_or(SheetError::IndexOutOfBounds { index: row, len })?;
        r.owner = new_owner.to_string();

        info!(user, table, row, owner = new_owner, "row owner written");
        self.trigger(TriggerEvent::WriteOwner {
            table: table.to_string(),
            row,
        });
        Ok(())
    }

    // =========================================================================
    // Cells and rows
    // =========================================================================

    /// Replace a cell's formula, subject to the column and row `write` formulas
    pub fn write_cell(
        &mut self,
        user: &str,
        table: &str,
        row: usize,
        column: &str,
        source: &str,
    ) -> Result<(), SheetError> {
        let coord = CellCoord::new(table, row, column);
        self.check_coord(&coord)?;
        if !self.authorize_write(user, &coord, Some(source))? {
            return Err(SheetError::PermissionDenied(format!(
                "{} cannot write {}",
                user, coord
            )));
        }
        self.table_mut(table)?.write_cell(row, column, source, user)?;

        info!(user, cell = %coord, "cell written");
        self.trigger(TriggerEvent::Write { coord });
        Ok(())
    }

    /// Insert a row at `row` (appending when `None`); returns its index
    pub fn add_row(
        &mut self,
        user: &str,
        table: &str,
        row: Option<usize>,
    ) -> Result<usize, SheetError> {
        let len = self.table(table)?.rows.len();
        let index = row.unwrap_or(len);
        if index > len {
            return Err(SheetError::IndexOutOfBounds { index, len });
        }
        if !self.authorize_row(user, table, PermKind::Add, index)? {
            return Err(SheetError::PermissionDenied(format!(
                "{} cannot add rows to {}",
                user, table
            )));
        }
        let index = self.table_mut(table)?.insert_row(Some(index), user)?;

        info!(user, table, row = index, "row added");
        self.trigger(TriggerEvent::AddRow {
            table: table.to_string(),
            row: index,
        });
        Ok(index)
    }

    pub fn delete_row(&mut self, user: &str, table: &str, row: usize) -> Result<(), SheetError> {
        let len = self.table(table)?.rows.len();
        if row >= len {
            return Err(SheetError::IndexOutOfBounds { index: row, len });
        }
        if !self.authorize_row(user, table, PermKind::Del, row)? {
            return Err(SheetError::PermissionDenied(format!(
                "{} cannot delete row {} of {}",
                user, row, table
            )));
        }
        self.table_mut(table)?.remove_row(row)?;

        info!(user, table, row, "row deleted");
        self.trigger(TriggerEvent::DeleteRow {
            table: table.to_string(),
            row,
        });
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn render_error(&self, error: &SheetError) -> Rendered {
        Rendered::Error(self.options.debug.then(|| error.to_string()))
    }

    /// Censor a cell that failed to evaluate (or was never evaluated)
    fn render_unavailable(&mut self, user: &str, coord: &CellCoord, shown: Rendered) -> Rendered {
        match self.can_read(user, coord) {
            Ok(true) => shown,
            Ok(false) => Rendered::Censored,
            Err(e) => self.render_error(&e),
        }
    }

    fn render_cell(&mut self, user: &str, coord: &CellCoord) -> Rendered {
        let value = if self.options.eager_eval {
            self.output_value(coord)
        } else {
            match self.output.state(coord) {
                CellState::Evaluated(value) => Ok(value.add_dep(Dep::cell(coord.clone()))),
                CellState::Error(error) => Err(error),
                CellState::Unevaluated | CellState::Evaluating => {
                    return self.render_unavailable(user, coord, Rendered::Pending);
                }
            }
        };

        match value {
            Ok(value) => censor(&value, user, self).unwrap_or_else(|e| self.render_error(&e)),
            Err(error) => {
                warn!(cell = %coord, %error, "cell evaluation failed");
                let shown = self.render_error(&error);
                self.render_unavailable(user, coord, shown)
            }
        }
    }

    /// Every cell of `table`, censored for `user`.
    ///
    /// Per-cell errors are logged and rendered, never returned.
    pub fn get_output_table(&mut self, user: &str, table: &str) -> Result<OutputTable, SheetError> {
        let (name, description, owner, columns, rows) = {
            let t = self.table(table)?;
            (
                t.name.clone(),
                t.description.clone(),
                t.owner.clone(),
                t.columns.clone(),
                t.rows.len(),
            )
        };

        let mut grid = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut cells = Vec::with_capacity(columns.len());
            for column in &columns {
                let coord = CellCoord::new(name.clone(), row, column.clone());
                cells.push(self.render_cell(user, &coord));
            }
            grid.push(cells);
        }

        Ok(OutputTable {
            name,
            description,
            owner,
            columns,
            rows: grid,
        })
    }

    /// Formula sources of `table`; a cell `user` cannot both read and write
    /// shows the censored sentinel
    pub fn get_input_table(&mut self, user: &str, table: &str) -> Result<InputTable, SheetError> {
        let t = self.table(table)?.clone();

        let mut rows = Vec::with_capacity(t.rows.len());
        for (index, row) in t.rows.iter().enumerate() {
            let mut cells = Vec::with_capacity(t.columns.len());
            for column in &t.columns {
                let coord = t.coord(index, column);
                let visible = self.can_read(user, &coord).unwrap_or(false)
                    && self.authorize_write(user, &coord, None).unwrap_or(false);
                let cell = match row.cells.get(column) {
                    Some(formula) if visible => InputCell {
                        source: formula.source().to_string(),
                        error: formula.error().map(|e| e.to_string()),
                        owner: formula.owner().to_string(),
                    },
                    Some(formula) => InputCell {
                        source: CENSORED.to_string(),
                        error: None,
                        owner: formula.owner().to_string(),
                    },
                    None => InputCell {
                        source: String::new(),
                        error: None,
                        owner: row.owner.clone(),
                    },
                };
                cells.push(cell);
            }
            rows.push(InputRow {
                owner: row.owner.clone(),
                cells,
            });
        }

        Ok(InputTable {
            name: t.name,
            description: t.description,
            owner: t.owner,
            columns: t.columns,
            rows,
        })
    }

    /// One cell, censored for `user`.
    ///
    /// Evaluation errors are returned only to users who can read the cell.
    pub fn get_cell(
        &mut self,
        user: &str,
        table: &str,
        row: usize,
        column: &str,
    ) -> Result<Rendered, SheetError> {
        let coord = CellCoord::new(table, row, column);
        self.check_coord(&coord)?;
        match self.output_value(&coord) {
            Ok(value) => censor(&value, user, self),
            Err(error) => {
                if self.can_read(user, &coord)? {
                    Err(error)
                } else {
                    Ok(Rendered::Censored)
                }
            }
        }
    }

    /// Evaluate an ad hoc formula as `user`
    pub fn eval_string(&mut self, user: &str, source: &str) -> Result<Rendered, SheetError> {
        let mut env = Env::new();
        env.bind("user", Value::string(user));
        let value = evaluate_formula(self, user, source, &env)?;
        censor(&value, user, self)
    }

    pub fn can_read_cell(
        &mut self,
        user: &str,
        table: &str,
        row: usize,
        column: &str,
    ) -> Result<bool, SheetError> {
        let coord = CellCoord::new(table, row, column);
        self.check_coord(&coord)?;
        self.can_read(user, &coord)
    }
}
