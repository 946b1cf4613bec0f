//! JSON persistence of users and tables. Caches are rebuilt lazily.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::config::SheetOptions;
use crate::sheet::{Sheet, User};
use crate::table::Table;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything that survives a restart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetData {
    pub users: BTreeMap<String, User>,
    pub tables: BTreeMap<String, Table>,
}

impl Sheet {
    pub fn to_data(&self) -> SheetData {
        SheetData {
            users: self.users.clone(),
            tables: self.tables.clone(),
        }
    }

    pub fn from_data(mut data: SheetData, options: SheetOptions) -> Self {
        data.users
            .entry(options.admin_user.clone())
            .or_insert_with(|| User {
                name: options.admin_user.clone(),
            });
        Sheet::from_parts(data.users, data.tables, options)
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.to_data())?)
    }

    pub fn from_json(json: &str, options: SheetOptions) -> Result<Self, StoreError> {
        let data: SheetData = serde_json::from_str(json)?;
        Ok(Sheet::from_data(data, options))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), tables = self.tables.len(), "sheet saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>, options: SheetOptions) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let sheet = Sheet::from_json(&fs::read_to_string(path)?, options)?;
        info!(path = %path.display(), tables = sheet.tables.len(), "sheet loaded");
        Ok(sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{PermKind, PermTarget};
    use websheet_core::{Rendered, SheetError};

    fn sheet() -> Sheet {
        let mut sheet = Sheet::default();
        sheet.create_user("alice");
        sheet
            .create_table("alice", "T", "saved", vec!["a".into(), "b".into()], None)
            .unwrap();
        sheet.add_row("alice", "T", None).unwrap();
        sheet.write_cell("alice", "T", 0, "a", "20").unwrap();
        sheet.write_cell("alice", "T", 0, "b", "a + 1").unwrap();
        sheet
            .write_perm("alice", "T", PermKind::Read, PermTarget::Column("a".into()), "owner == user")
            .unwrap();
        sheet.write_cell("alice", "T", 0, "b", "1 +").unwrap();
        sheet
    }

    #[test]
    fn test_save_and_load() {
        let mut before = sheet();
        assert!(before.get_output_table("alice", "T").is_ok());

        let path = std::env::temp_dir().join(format!("websheet-store-{}.json", std::process::id()));
        before.save(&path).unwrap();
        let mut after = Sheet::load(&path, SheetOptions::default()).unwrap();
        fs::remove_file(&path).ok();

        assert!(after.output_cache().is_empty());
        assert_eq!(after.list_users().len(), 2);
        let table = after.table("T").unwrap();
        assert_eq!(table.description, "saved");
        assert_eq!(table.cell(0, "b").unwrap().source(), "1 +");
        assert!(matches!(
            table.cell(0, "b").unwrap().error(),
            Some(SheetError::Parse { .. })
        ));

        assert_eq!(after.get_cell("alice", "T", 0, "a").unwrap(), Rendered::Number(20.0));
        assert_eq!(after.get_cell("bob", "T", 0, "a").unwrap(), Rendered::Censored);
    }

    #[test]
    fn test_load_adds_configured_admin() {
        let options = SheetOptions {
            admin_user: "root".into(),
            ..SheetOptions::default()
        };
        let sheet = Sheet::from_json(&sheet().to_json().unwrap(), options).unwrap();
        let users: Vec<_> = sheet.list_users().into_iter().map(|u| u.user).collect();
        assert!(users.contains(&"root".to_string()));
        assert!(users.contains(&"admin".to_string()));
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            Sheet::from_json("{not json", SheetOptions::default()),
            Err(StoreError::Json(_))
        ));
        assert!(matches!(
            Sheet::load("/nonexistent/websheets.json", SheetOptions::default()),
            Err(StoreError::Io(_))
        ));
        let empty = Sheet::from_json("{}", SheetOptions::default()).unwrap();
        assert!(empty.list_tables().is_empty());
    }
}
