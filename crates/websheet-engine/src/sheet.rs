use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info};

use websheet_core::{
    CellCoord, ColSel, Dep, DepSet, RowSel, SheetError, TableRef, Value, OWNER_COLUMN,
};
use websheet_formula::{Env, Evaluator, SheetContext, TableShape};

use crate::cache::{CellCache, CellState, OldData};
use crate::config::SheetOptions;
use crate::mail::{LogMailer, Mail, Mailer};
use crate::table::Table;

/// Helper script callable from formulas by name: `(user, args) -> value`
pub type Script = Box<dyn FnMut(&str, &[Value]) -> Result<Value, SheetError>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
}

/// Which cache a lookup goes through
#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheId<'a> {
    Output,
    Permission(&'a str),
}

impl fmt::Display for CacheId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheId::Output => write!(f, "output"),
            CacheId::Permission(user) => write!(f, "permission({})", user),
        }
    }
}

/// The whole reactive sheet: users, input tables, the output cache and one
/// permission cache per user.
pub struct Sheet {
    pub(crate) users: BTreeMap<String, User>,
    pub(crate) tables: BTreeMap<String, Table>,
    pub(crate) output: CellCache,
    pub(crate) permissions: HashMap<String, CellCache>,
    /// Global edit counter
    pub(crate) generation: u64,
    /// Generation of the last row insertion/deletion per table
    pub(crate) structure: HashMap<String, u64>,
    pub(crate) options: SheetOptions,
    mailer: Box<dyn Mailer>,
    scripts: HashMap<String, Script>,
    clock: Option<DateTime<Utc>>,
}

impl Default for Sheet {
    fn default() -> Self {
        Self::new(SheetOptions::default())
    }
}

impl fmt::Debug for Sheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sheet")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("generation", &self.generation)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Sheet {
    pub fn new(options: SheetOptions) -> Self {
        let mut users = BTreeMap::new();
        users.insert(
            options.admin_user.clone(),
            User {
                name: options.admin_user.clone(),
            },
        );
        Self::from_parts(users, BTreeMap::new(), options)
    }

    pub(crate) fn from_parts(
        users: BTreeMap<String, User>,
        tables: BTreeMap<String, Table>,
        options: SheetOptions,
    ) -> Self {
        Sheet {
            users,
            tables,
            output: CellCache::new(),
            permissions: HashMap::new(),
            generation: 0,
            structure: HashMap::new(),
            options,
            mailer: Box::new(LogMailer),
            scripts: HashMap::new(),
            clock: None,
        }
    }

    /// Transport used for `MAIL` when sending is enabled
    pub fn set_mailer(&mut self, mailer: impl Mailer + 'static) {
        self.mailer = Box::new(mailer);
    }

    pub fn register_script(
        &mut self,
        name: impl Into<String>,
        script: impl FnMut(&str, &[Value]) -> Result<Value, SheetError> + 'static,
    ) {
        self.scripts.insert(name.into(), Box::new(script));
    }

    /// Pin the clock seen by formulas; `None` follows the system time
    pub fn set_clock(&mut self, now: Option<DateTime<Utc>>) {
        self.clock = now;
    }

    pub fn options(&self) -> &SheetOptions {
        &self.options
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn output_cache(&self) -> &CellCache {
        &self.output
    }

    pub fn permission_cache(&self, user: &str) -> Option<&CellCache> {
        self.permissions.get(user)
    }

    pub fn table(&self, name: &str) -> Result<&Table, SheetError> {
        self.tables
            .get(name)
            .ok_or_else(|| SheetError::NoSuchTable(name.to_string()))
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Result<&mut Table, SheetError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| SheetError::NoSuchTable(name.to_string()))
    }

    pub(crate) fn check_coord(&self, coord: &CellCoord) -> Result<(), SheetError> {
        self.table(&coord.table)?.check_coord(coord.row, &coord.column)
    }

    pub(crate) fn cache_mut(&mut self, id: CacheId<'_>) -> &mut CellCache {
        match id {
            CacheId::Output => &mut self.output,
            CacheId::Permission(user) => self.permissions.entry(user.to_string()).or_default(),
        }
    }

    /// Value of a cell through the output cache, carrying a dependency on
    /// the cell itself
    pub(crate) fn output_value(&mut self, coord: &CellCoord) -> Result<Value, SheetError> {
        self.check_coord(coord)?;
        let value = self.lookup(CacheId::Output, coord)?;
        Ok(value.add_dep(Dep::cell(coord.clone())))
    }

    /// Cache lookup with evaluation on a miss
    pub(crate) fn lookup(&mut self, id: CacheId<'_>, coord: &CellCoord) -> Result<Value, SheetError> {
        match self.cache_mut(id).state(coord) {
            CellState::Evaluated(value) => return Ok(value),
            CellState::Error(error) => return Err(error),
            CellState::Evaluating => {
                return Err(match id {
                    CacheId::Output => SheetError::ValueDependencyLoop(coord.clone()),
                    CacheId::Permission(_) => SheetError::PermissionDependencyLoop(coord.clone()),
                })
            }
            CellState::Unevaluated => {}
        }

        let old = self.cache_mut(id).begin(coord);

        if let Some(old) = old.as_ref().filter(|o| o.revive) {
            if self.is_fresh(old) {
                debug!(cell = %coord, cache = %id, "revived");
                let verified_at = self.generation;
                self.cache_mut(id)
                    .finish(coord, old.value.clone(), old.generation, verified_at);
                return Ok(old.value.clone());
            }
        }

        debug!(cell = %coord, cache = %id, "cache miss");
        let result = match id {
            CacheId::Output => self.compute_cell(coord),
            CacheId::Permission(user) => self.compute_permission(user, coord),
        };

        match result {
            Ok(value) => {
                let generation = match &old {
                    Some(old) if old.value.same_as(&value) => old.generation,
                    _ => self.generation,
                };
                let verified_at = self.generation;
                self.cache_mut(id)
                    .finish(coord, value.clone(), generation, verified_at);
                Ok(value)
            }
            Err(error) if error.is_loop() => {
                self.cache_mut(id).abandon(coord);
                Err(error)
            }
            Err(error) => {
                self.cache_mut(id).fail(coord, error.clone());
                Err(error)
            }
        }
    }

    // Every recorded dependency of `old` is unchanged since it was verified.
    fn is_fresh(&mut self, old: &OldData) -> bool {
        let now = self.now();
        for dep in old.value.all_deps().iter() {
            let fresh = match dep {
                Dep::Normal {
                    recalculate: false, ..
                } => true,
                Dep::Normal { coord, .. } if coord.column == OWNER_COLUMN => true,
                Dep::Normal { coord, .. } => match self.output_value(coord) {
                    Ok(_) => self
                        .output
                        .generation(coord)
                        .map_or(false, |g| g <= old.verified_at),
                    Err(_) => false,
                },
                Dep::Row { table, .. } => self
                    .structure
                    .get(table)
                    .map_or(true, |g| *g <= old.verified_at),
                Dep::Time { at } | Dep::Trigger { at, .. } => now < *at,
            };
            if !fresh {
                return false;
            }
        }
        true
    }

    fn compute_cell(&mut self, coord: &CellCoord) -> Result<Value, SheetError> {
        let (ast, owner, env) = {
            let table = self.table(&coord.table)?;
            match table.cell(coord.row, &coord.column) {
                Some(formula) => (
                    formula.ast()?,
                    formula.owner().to_string(),
                    cell_env(table, coord.row, &coord.column),
                ),
                None => return Ok(Value::null()),
            }
        };
        Evaluator::new(self, &owner).eval_resolved(&ast, &env)
    }

    /// Column `read` formula AND row `read` formula, as `user`
    fn compute_permission(&mut self, user: &str, coord: &CellCoord) -> Result<Value, SheetError> {
        let (formulas, env) = {
            let table = self.table(&coord.table)?;
            let read = &table.perms.read;
            let mut formulas = Vec::with_capacity(2);
            for formula in [read.column(&coord.column), read.row.as_ref()].into_iter().flatten() {
                formulas.push(formula.ast()?);
            }
            let env = cell_env(table, coord.row, &coord.column).with("user", Value::string(user));
            (formulas, env)
        };

        let mut evaluator = Evaluator::new(self, user);
        let mut deps = DepSet::new();
        for ast in formulas {
            let value = evaluator.eval_resolved(&ast, &env)?;
            let allowed = value.as_permission()?;
            deps.extend(&value.all_deps());
            if !allowed {
                return Ok(Value::bool(false).add_deps(&deps));
            }
        }
        Ok(Value::bool(true).add_deps(&deps))
    }
}

/// Bindings visible to every formula of `table`
pub(crate) fn table_env(table: &Table) -> Env {
    let mut env = Env::new();
    env.bind("tableName", Value::string(table.name.clone()));
    env.bind("tableOwner", Value::string(table.owner.clone()));
    env
}

/// Table bindings plus the row's columns, `row` and its `owner`
pub(crate) fn row_env(table: &Table, row: usize) -> Env {
    let mut env = table_env(table);
    env.bind("rowIndex", Value::number(row as f64));
    for column in &table.columns {
        env.bind(
            column.clone(),
            Value::table_ref(TableRef::cell(&table.coord(row, column))),
        );
    }
    env.bind(
        "row",
        Value::table_ref(TableRef {
            table: table.name.clone(),
            row: RowSel::One(row),
            col: ColSel::All,
        }),
    );
    if let Some(r) = table.row(row) {
        env.bind(
            "owner",
            Value::string(r.owner.clone()).add_dep(Dep::cell(table.coord(row, OWNER_COLUMN))),
        );
    }
    env
}

/// Row bindings plus the current column, `col` and the cell owner
pub(crate) fn cell_env(table: &Table, row: usize, column: &str) -> Env {
    let mut env = row_env(table, row);
    env.bind("colName", Value::string(column));
    env.bind(
        "col",
        Value::table_ref(TableRef {
            table: table.name.clone(),
            row: RowSel::All,
            col: ColSel::One(column.to_string()),
        }),
    );
    if let Some(cell) = table.cell(row, column) {
        env.bind("cellOwner", Value::string(cell.owner()));
    }
    env
}

impl SheetContext for Sheet {
    fn table_shape(&self, table: &str) -> Option<TableShape> {
        self.tables.get(table).map(Table::shape)
    }

    fn cell_value(&mut self, coord: &CellCoord) -> Result<Value, SheetError> {
        self.output_value(coord)
    }

    fn can_read(&mut self, user: &str, coord: &CellCoord) -> Result<bool, SheetError> {
        self.can_read_with(user, coord, &mut Vec::new())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn send_mail(&mut self, to: &str, subject: &str, body: &str) -> Result<(), SheetError> {
        let mail = Mail {
            from: self.options.mail_sender.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        if self.options.send_mail {
            info!(to, subject, "sending mail");
            self.mailer.send(&mail)
        } else {
            LogMailer.send(&mail)
        }
    }

    fn call_script(
        &mut self,
        name: &str,
        user: &str,
        args: &[Value],
    ) -> Option<Result<Value, SheetError>> {
        let script = self.scripts.get_mut(name)?;
        debug!(script = name, user, "calling script");
        Some(script(user, args))
    }
}
