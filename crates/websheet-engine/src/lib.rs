pub mod api;
pub mod cache;
pub mod config;
pub mod import;
pub mod mail;
pub mod permission;
pub mod sheet;
pub mod store;
pub mod table;
pub mod trigger;

pub use api::{InputCell, InputRow, InputTable, Keywords, OutputTable, TableSummary, UserSummary};
pub use cache::{CachedCell, CellCache, CellState, OldData};
pub use config::{ConfigError, SheetOptions};
pub use import::{ImportedPermission, ImportedRow, ImportedTable, Importer, JsonImporter};
pub use mail::{LogMailer, Mail, Mailer};
pub use sheet::{Script, Sheet, User};
pub use store::{SheetData, StoreError};
pub use table::{
    ColumnMeta, Formula, FormulaKind, PermGroup, PermKind, PermTarget, Permissions, Row, Table,
};
pub use trigger::TriggerEvent;
