use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use websheet_core::{CellCoord, SheetError};
use websheet_formula::{parse_cell, parse_permission, Expr, TableShape};

/// Whether blank source means `null` (value cells) or `true` (permission slots)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormulaKind {
    #[default]
    Value,
    Permission,
}

/// Formula source with its compiled AST (or the sticky parse error)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredFormula", into = "StoredFormula")]
pub struct Formula {
    source: String,
    owner: String,
    label: String,
    kind: FormulaKind,
    compiled: Result<Arc<Expr>, SheetError>,
}

/// On-disk form of a formula; the AST is rebuilt on load
#[derive(Serialize, Deserialize)]
struct StoredFormula {
    source: String,
    owner: String,
    label: String,
    #[serde(default)]
    kind: FormulaKind,
}

impl From<StoredFormula> for Formula {
    fn from(stored: StoredFormula) -> Self {
        Formula::compile(stored.source, stored.owner, stored.label, stored.kind)
    }
}

impl From<Formula> for StoredFormula {
    fn from(formula: Formula) -> Self {
        StoredFormula {
            source: formula.source,
            owner: formula.owner,
            label: formula.label,
            kind: formula.kind,
        }
    }
}

impl Formula {
    /// A value cell formula
    pub fn value(source: impl Into<String>, owner: impl Into<String>, label: impl Into<String>) -> Self {
        Self::compile(source.into(), owner.into(), label.into(), FormulaKind::Value)
    }

    /// A permission slot formula
    pub fn permission(
        source: impl Into<String>,
        owner: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self::compile(source.into(), owner.into(), label.into(), FormulaKind::Permission)
    }

    fn compile(source: String, owner: String, label: String, kind: FormulaKind) -> Self {
        let parsed = match kind {
            FormulaKind::Value => parse_cell(&source, &label),
            FormulaKind::Permission => parse_permission(&source, &label),
        };
        Formula {
            compiled: parsed.map(Arc::new).map_err(SheetError::from),
            source,
            owner,
            label,
            kind,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> FormulaKind {
        self.kind
    }

    /// The compiled tree, or the parse error it failed with
    pub fn ast(&self) -> Result<Arc<Expr>, SheetError> {
        self.compiled.clone()
    }

    pub fn error(&self) -> Option<&SheetError> {
        self.compiled.as_ref().err()
    }

    /// Move the formula to a new coordinate label, AST locations included
    pub fn relabel(&mut self, label: impl Into<String>) {
        self.label = label.into();
        match &mut self.compiled {
            Ok(ast) => Arc::make_mut(ast).relabel(&self.label),
            Err(SheetError::Parse { cell, .. }) => *cell = self.label.clone(),
            Err(_) => {}
        }
    }

    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }
}

/// The five permission groups of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermKind {
    Read,
    Write,
    Init,
    Add,
    Del,
}

impl PermKind {
    pub const ALL: [PermKind; 5] = [
        PermKind::Read,
        PermKind::Write,
        PermKind::Init,
        PermKind::Add,
        PermKind::Del,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PermKind::Read => "read",
            PermKind::Write => "write",
            PermKind::Init => "init",
            PermKind::Add => "add",
            PermKind::Del => "del",
        }
    }
}

impl fmt::Display for PermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PermKind {
    type Err = SheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| SheetError::InvalidArgument(format!("unknown permission '{}'", s)))
    }
}

/// A permission slot: one column, or the row-level formula
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermTarget {
    Row,
    Column(String),
}

impl PermTarget {
    /// `"row"` selects the row-level slot, anything else a column
    pub fn parse(target: &str) -> Self {
        if target == "row" {
            PermTarget::Row
        } else {
            PermTarget::Column(target.to_string())
        }
    }

    fn label_part(&self) -> &str {
        match self {
            PermTarget::Row => "row",
            PermTarget::Column(c) => c,
        }
    }
}

/// Per-column formulas of one permission kind plus the row-level formula
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermGroup {
    #[serde(default)]
    pub columns: BTreeMap<String, Formula>,
    #[serde(default)]
    pub row: Option<Formula>,
}

impl PermGroup {
    pub fn column(&self, column: &str) -> Option<&Formula> {
        self.columns.get(column)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permissions {
    pub read: PermGroup,
    pub write: PermGroup,
    /// Value formulas copied into every new row
    pub init: PermGroup,
    pub add: PermGroup,
    pub del: PermGroup,
}

impl Permissions {
    /// Everything allowed, every init formula blank
    pub fn allow_all(table: &str, owner: &str, columns: &[String]) -> Self {
        let group = |kind: PermKind, with_columns: bool, with_row: bool| {
            let slot = |target: &PermTarget| {
                let label = perm_label(table, kind, target);
                match kind {
                    PermKind::Init => Formula::value("", owner, label),
                    _ => Formula::permission("", owner, label),
                }
            };
            PermGroup {
                columns: if with_columns {
                    columns
                        .iter()
                        .map(|c| (c.clone(), slot(&PermTarget::Column(c.clone()))))
                        .collect()
                } else {
                    BTreeMap::new()
                },
                row: with_row.then(|| slot(&PermTarget::Row)),
            }
        };

        Permissions {
            read: group(PermKind::Read, true, true),
            write: group(PermKind::Write, true, true),
            init: group(PermKind::Init, true, false),
            add: group(PermKind::Add, false, true),
            del: group(PermKind::Del, false, true),
        }
    }

    pub fn group(&self, kind: PermKind) -> &PermGroup {
        match kind {
            PermKind::Read => &self.read,
            PermKind::Write => &self.write,
            PermKind::Init => &self.init,
            PermKind::Add => &self.add,
            PermKind::Del => &self.del,
        }
    }

    fn group_mut(&mut self, kind: PermKind) -> &mut PermGroup {
        match kind {
            PermKind::Read => &mut self.read,
            PermKind::Write => &mut self.write,
            PermKind::Init => &mut self.init,
            PermKind::Add => &mut self.add,
            PermKind::Del => &mut self.del,
        }
    }

    pub fn get(&self, kind: PermKind, target: &PermTarget) -> Option<&Formula> {
        let group = self.group(kind);
        match target {
            PermTarget::Row => group.row.as_ref(),
            PermTarget::Column(c) => group.column(c),
        }
    }

    /// Replace the formula of one slot
    pub fn set(
        &mut self,
        table: &str,
        kind: PermKind,
        target: &PermTarget,
        source: &str,
        owner: &str,
    ) -> Result<(), SheetError> {
        let label = perm_label(table, kind, target);
        let formula = match kind {
            PermKind::Init => Formula::value(source, owner, label),
            _ => Formula::permission(source, owner, label),
        };

        let group = self.group_mut(kind);
        match (kind, target) {
            (PermKind::Init, PermTarget::Row) => Err(SheetError::InvalidArgument(
                "init formulas are per column".into(),
            )),
            (PermKind::Add | PermKind::Del, PermTarget::Column(_)) => Err(
                SheetError::InvalidArgument(format!("{} formulas are per row", kind)),
            ),
            (_, PermTarget::Row) => {
                group.row = Some(formula);
                Ok(())
            }
            (_, PermTarget::Column(c)) => match group.columns.get_mut(c) {
                Some(slot) => {
                    *slot = formula;
                    Ok(())
                }
                None => Err(SheetError::MissingField(c.clone())),
            },
        }
    }
}

fn perm_label(table: &str, kind: PermKind, target: &PermTarget) -> String {
    format!("{}.{}.{}", table, kind, target.label_part())
}

/// Display hints for a column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub owner: String,
    pub cells: BTreeMap<String, Formula>,
}

/// An input table: schema, permission formulas and cell formulas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, ColumnMeta>,
    pub perms: Permissions,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        owner: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        let name = name.into();
        let owner = owner.into();
        Table {
            perms: Permissions::allow_all(&name, &owner, &columns),
            name,
            description: description.into(),
            owner,
            columns,
            meta: BTreeMap::new(),
            rows: Vec::new(),
        }
    }

    pub fn shape(&self) -> TableShape {
        TableShape {
            rows: self.rows.len(),
            columns: self.columns.clone(),
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn row(&self, row: usize) -> Option<&Row> {
        self.rows.get(row)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Formula> {
        self.rows.get(row).and_then(|r| r.cells.get(column))
    }

    /// Fail unless `(row, column)` exists in this table
    pub fn check_coord(&self, row: usize, column: &str) -> Result<(), SheetError> {
        if row >= self.rows.len() {
            return Err(SheetError::IndexOutOfBounds {
                index: row,
                len: self.rows.len(),
            });
        }
        if !self.has_column(column) {
            return Err(SheetError::MissingField(column.to_string()));
        }
        Ok(())
    }

    pub fn coord(&self, row: usize, column: &str) -> CellCoord {
        CellCoord::new(self.name.clone(), row, column)
    }

    /// Insert a row built from the init formulas; appends when `index` is `None`
    pub fn insert_row(&mut self, index: Option<usize>, owner: &str) -> Result<usize, SheetError> {
        let index = index.unwrap_or(self.rows.len());
        if index > self.rows.len() {
            return Err(SheetError::IndexOutOfBounds {
                index,
                len: self.rows.len(),
            });
        }

        let cells = self
            .perms
            .init
            .columns
            .iter()
            .map(|(column, init)| {
                let mut cell = init.clone();
                cell.relabel(self.coord(index, column).label());
                cell.set_owner(owner);
                (column.clone(), cell)
            })
            .collect();

        self.rows.insert(
            index,
            Row {
                owner: owner.to_string(),
                cells,
            },
        );
        self.relabel_from(index + 1);
        Ok(index)
    }

    pub fn remove_row(&mut self, index: usize) -> Result<Row, SheetError> {
        if index >= self.rows.len() {
            return Err(SheetError::IndexOutOfBounds {
                index,
                len: self.rows.len(),
            });
        }
        let row = self.rows.remove(index);
        self.relabel_from(index);
        Ok(row)
    }

    /// Replace a cell's formula; the writer becomes the cell owner
    pub fn write_cell(
        &mut self,
        row: usize,
        column: &str,
        source: &str,
        owner: &str,
    ) -> Result<(), SheetError> {
        self.check_coord(row, column)?;
        let label = self.coord(row, column).label();
        if let Some(r) = self.rows.get_mut(row) {
            r.cells
                .insert(column.to_string(), Formula::value(source, owner, label));
        }
        Ok(())
    }

    // Rows at and after `start` moved: keep labels in step with their index.
    fn relabel_from(&mut self, start: usize) {
        let name = self.name.clone();
        for (index, row) in self.rows.iter_mut().enumerate().skip(start) {
            for (column, cell) in row.cells.iter_mut() {
                cell.relabel(CellCoord::new(name.clone(), index, column.clone()).label());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new("T", "test", "alice", vec!["a".into(), "b".into()])
    }

    #[test]
    fn test_new_table_allows_everything() {
        let t = table();
        assert_eq!(t.perms.read.columns.len(), 2);
        assert!(t.perms.read.row.is_some());
        assert!(t.perms.init.row.is_none());
        assert!(t.perms.add.columns.is_empty());
        let read = t.perms.get(PermKind::Read, &PermTarget::Column("a".into())).unwrap();
        assert_eq!(read.label(), "T.read.a");
        assert_eq!(read.kind(), FormulaKind::Permission);
    }

    #[test]
    fn test_insert_row_uses_init_formulas() {
        let mut t = table();
        t.perms
            .set("T", PermKind::Init, &PermTarget::Column("a".into()), "1 + 1", "alice")
            .unwrap();
        assert_eq!(t.insert_row(None, "bob").unwrap(), 0);

        let cell = t.cell(0, "a").unwrap();
        assert_eq!(cell.source(), "1 + 1");
        assert_eq!(cell.owner(), "bob");
        assert_eq!(cell.label(), "T.0.a");
        assert_eq!(cell.ast().unwrap().loc.cell, "T.0.a");
        assert_eq!(t.row(0).unwrap().owner, "bob");
    }

    #[test]
    fn test_insert_and_remove_relabel_later_rows() {
        let mut t = table();
        t.insert_row(None, "alice").unwrap();
        t.write_cell(0, "a", "7", "alice").unwrap();
        t.insert_row(Some(0), "bob").unwrap();

        let moved = t.cell(1, "a").unwrap();
        assert_eq!(moved.source(), "7");
        assert_eq!(moved.label(), "T.1.a");
        assert_eq!(moved.ast().unwrap().loc.cell, "T.1.a");

        t.remove_row(0).unwrap();
        assert_eq!(t.cell(0, "a").unwrap().label(), "T.0.a");
        assert!(t.remove_row(5).is_err());
        assert!(t.insert_row(Some(3), "bob").is_err());
    }

    #[test]
    fn test_parse_error_is_kept() {
        let mut t = table();
        t.insert_row(None, "alice").unwrap();
        t.write_cell(0, "b", "1 +", "alice").unwrap();
        let cell = t.cell(0, "b").unwrap();
        assert!(matches!(cell.error(), Some(SheetError::Parse { cell, .. }) if cell == "T.0.b"));
        assert!(t.write_cell(0, "zz", "1", "alice").is_err());
        assert!(t.write_cell(3, "a", "1", "alice").is_err());
    }

    #[test]
    fn test_slot_validation() {
        let mut t = table();
        assert!(t.perms.set("T", PermKind::Init, &PermTarget::Row, "1", "a").is_err());
        assert!(t
            .perms
            .set("T", PermKind::Add, &PermTarget::Column("a".into()), "true", "a")
            .is_err());
        assert!(matches!(
            t.perms.set("T", PermKind::Read, &PermTarget::Column("zz".into()), "true", "a"),
            Err(SheetError::MissingField(_))
        ));
        t.perms.set("T", PermKind::Del, &PermTarget::Row, "owner == user", "a").unwrap();
        assert_eq!(t.perms.del.row.as_ref().unwrap().source(), "owner == user");
        assert_eq!("write".parse::<PermKind>().unwrap(), PermKind::Write);
        assert_eq!(PermTarget::parse("row"), PermTarget::Row);
    }

    #[test]
    fn test_formula_serde_recompiles() {
        let formula = Formula::value("1 + 2", "alice", "T.0.a");
        let json = serde_json::to_string(&formula).unwrap();
        assert!(!json.contains("compiled"));
        let back: Formula = serde_json::from_str(&json).unwrap();
        assert_eq!(back.source(), "1 + 2");
        assert_eq!(*back.ast().unwrap(), *formula.ast().unwrap());
    }
}
