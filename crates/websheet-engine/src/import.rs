//! Bulk table import.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use websheet_core::SheetError;

use crate::api::{check_columns, check_name};
use crate::sheet::Sheet;
use crate::table::{PermKind, PermTarget, Table};
use crate::trigger::TriggerEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedRow {
    /// Defaults to the importing user
    #[serde(default)]
    pub owner: Option<String>,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedPermission {
    pub kind: PermKind,
    /// Column name or `"row"`
    pub target: String,
    pub source: String,
}

/// One table as delivered by an importer, cells given as formula sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedTable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<ImportedRow>,
    #[serde(default)]
    pub permissions: Vec<ImportedPermission>,
}

/// Source of tables for [`Sheet::import`]
pub trait Importer {
    fn tables(&mut self) -> Result<Vec<ImportedTable>, SheetError>;
}

impl Importer for Vec<ImportedTable> {
    fn tables(&mut self) -> Result<Vec<ImportedTable>, SheetError> {
        Ok(std::mem::take(self))
    }
}

/// Reads a JSON array of [`ImportedTable`] from a file
#[derive(Debug, Clone)]
pub struct JsonImporter {
    pub path: PathBuf,
}

impl JsonImporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Importer for JsonImporter {
    fn tables(&mut self) -> Result<Vec<ImportedTable>, SheetError> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            SheetError::InvalidArgument(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            SheetError::InvalidArgument(format!("cannot parse {}: {}", self.path.display(), e))
        })
    }
}

fn build_table(user: &str, imported: &ImportedTable) -> Result<Table, SheetError> {
    check_name("table", &imported.name)?;
    check_columns(&imported.columns)?;
    let mut table = Table::new(
        imported.name.as_str(),
        imported.description.as_str(),
        user,
        imported.columns.clone(),
    );

    for perm in &imported.permissions {
        let target = PermTarget::parse(&perm.target);
        table
            .perms
            .set(&imported.name, perm.kind, &target, &perm.source, user)?;
    }

    for row in &imported.rows {
        if row.cells.len() > imported.columns.len() {
            return Err(SheetError::InvalidArgument(format!(
                "row of {} cells in table {} with {} columns",
                row.cells.len(),
                imported.name,
                imported.columns.len()
            )));
        }
        let owner = row.owner.as_deref().unwrap_or(user);
        let index = table.insert_row(None, owner)?;
        for (column, source) in imported.columns.iter().zip(&row.cells) {
            if !source.is_empty() {
                table.write_cell(index, column, source, owner)?;
            }
        }
    }
    Ok(table)
}

impl Sheet {
    /// Create every table the importer yields, owned by `user`.
    ///
    /// Nothing is created if any table is invalid or already exists.
    pub fn import(
        &mut self,
        user: &str,
        importer: &mut dyn Importer,
    ) -> Result<Vec<String>, SheetError> {
        let imported = importer.tables()?;

        let mut tables = Vec::with_capacity(imported.len());
        for table in &imported {
            if self.tables.contains_key(&table.name)
                || tables.iter().any(|t: &Table| t.name == table.name)
            {
                return Err(SheetError::InvalidArgument(format!(
                    "table {} already exists",
                    table.name
                )));
            }
            tables.push(build_table(user, table)?);
        }

        let mut names = Vec::with_capacity(tables.len());
        for table in tables {
            let name = table.name.clone();
            info!(user, table = %name, rows = table.rows.len(), "table imported");
            self.tables.insert(name.clone(), table);
            self.trigger(TriggerEvent::CreateTable {
                table: name.clone(),
            });
            names.push(name);
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use websheet_core::Rendered;

    fn imported() -> ImportedTable {
        ImportedTable {
            name: "Grades".into(),
            description: "imported".into(),
            columns: vec!["student".into(), "score".into()],
            rows: vec![
                ImportedRow {
                    owner: Some("bob".into()),
                    cells: vec!["\"bob\"".into(), "90".into()],
                },
                ImportedRow {
                    owner: None,
                    cells: vec!["\"carol\"".into()],
                },
            ],
            permissions: vec![ImportedPermission {
                kind: PermKind::Read,
                target: "score".into(),
                source: "owner == user".into(),
            }],
        }
    }

    #[test]
    fn test_import_creates_rows_and_permissions() {
        let mut sheet = Sheet::default();
        let names = sheet.import("alice", &mut vec![imported()]).unwrap();
        assert_eq!(names, vec!["Grades".to_string()]);

        let table = sheet.table("Grades").unwrap();
        assert_eq!(table.owner, "alice");
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].owner, "bob");
        assert_eq!(table.rows[1].owner, "alice");
        assert_eq!(table.cell(0, "score").unwrap().owner(), "bob");

        assert_eq!(
            sheet.get_cell("bob", "Grades", 0, "score").unwrap(),
            Rendered::Number(90.0)
        );
        assert_eq!(
            sheet.get_cell("carol", "Grades", 0, "score").unwrap(),
            Rendered::Censored
        );
        assert_eq!(
            sheet.get_cell("alice", "Grades", 1, "score").unwrap(),
            Rendered::Null
        );
    }

    #[test]
    fn test_import_is_all_or_nothing() {
        let mut sheet = Sheet::default();
        let mut bad = imported();
        bad.name = "Other".into();
        bad.permissions.push(ImportedPermission {
            kind: PermKind::Add,
            target: "score".into(),
            source: "true".into(),
        });
        assert!(sheet.import("alice", &mut vec![imported(), bad]).is_err());
        assert!(sheet.list_tables().is_empty());

        sheet.import("alice", &mut vec![imported()]).unwrap();
        assert!(sheet.import("alice", &mut vec![imported()]).is_err());
    }

    #[test]
    fn test_import_rejects_wide_rows() {
        let mut sheet = Sheet::default();
        let mut wide = imported();
        wide.rows[0].cells.push("1".into());
        assert!(matches!(
            sheet.import("alice", &mut vec![wide]),
            Err(SheetError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_json_importer() {
        let path = std::env::temp_dir().join(format!("websheet-import-{}.json", std::process::id()));
        fs::write(&path, serde_json::to_string(&vec![imported()]).unwrap()).unwrap();

        let mut sheet = Sheet::default();
        let names = sheet.import("alice", &mut JsonImporter::new(&path)).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(names, vec!["Grades".to_string()]);

        let mut missing = JsonImporter::new("/nonexistent/websheet.json");
        assert!(missing.tables().is_err());
    }
}
