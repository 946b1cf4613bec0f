use serde::{Deserialize, Serialize};
use std::fmt;

/// Pseudo-column holding a row's owner; `writeOwner` invalidates through it.
pub const OWNER_COLUMN: &str = "_owner";

/// Absolute cell coordinate: table name, 0-indexed row, column name
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellCoord {
    pub table: String,
    pub row: usize,
    pub column: String,
}

impl CellCoord {
    pub fn new(table: impl Into<String>, row: usize, column: impl Into<String>) -> Self {
        CellCoord {
            table: table.into(),
            row,
            column: column.into(),
        }
    }

    /// Parse the `table.row.column` label used in AST locations
    pub fn from_label(label: &str) -> Option<Self> {
        let mut parts = label.splitn(3, '.');
        let table = parts.next()?;
        let row = parts.next()?.parse().ok()?;
        let column = parts.next()?;
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(CellCoord::new(table, row, column))
    }

    /// Label used in AST locations and diagnostics (e.g. `Paper.3.title`)
    pub fn label(&self) -> String {
        format!("{}.{}.{}", self.table, self.row, self.column)
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.table, self.row, self.column)
    }
}

/// Row axis of a table reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSel {
    All,
    One(usize),
    Many(Vec<usize>),
}

/// Column axis of a table reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColSel {
    All,
    One(String),
    Many(Vec<String>),
}

impl RowSel {
    pub fn is_bound(&self) -> bool {
        !matches!(self, RowSel::All)
    }

    /// Concrete row list, expanding `All` against the table height
    pub fn indices(&self, rows: usize) -> Vec<usize> {
        match self {
            RowSel::All => (0..rows).collect(),
            RowSel::One(r) => vec![*r],
            RowSel::Many(rs) => rs.clone(),
        }
    }
}

impl ColSel {
    pub fn is_bound(&self) -> bool {
        !matches!(self, ColSel::All)
    }

    /// Concrete column list, expanding `All` against the table schema
    pub fn names(&self, columns: &[String]) -> Vec<String> {
        match self {
            ColSel::All => columns.to_vec(),
            ColSel::One(c) => vec![c.clone()],
            ColSel::Many(cs) => cs.clone(),
        }
    }
}

impl fmt::Display for RowSel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowSel::All => write!(f, "*"),
            RowSel::One(r) => write!(f, "{}", r),
            RowSel::Many(rs) => {
                let items: Vec<String> = rs.iter().map(|r| r.to_string()).collect();
                write!(f, "{{{}}}", items.join(", "))
            }
        }
    }
}

impl fmt::Display for ColSel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColSel::All => write!(f, "*"),
            ColSel::One(c) => write!(f, "{}", c),
            ColSel::Many(cs) => write!(f, "{{{}}}", cs.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip() {
        let coord = CellCoord::new("Paper", 3, "title");
        assert_eq!(coord.label(), "Paper.3.title");
        assert_eq!(CellCoord::from_label("Paper.3.title"), Some(coord));
        assert_eq!(CellCoord::from_label("Paper.x.title"), None);
        assert_eq!(CellCoord::from_label("Paper.read.title"), None);
    }

    #[test]
    fn test_axis_expansion() {
        let columns = vec!["a".to_string(), "b".to_string()];
        assert_eq!(RowSel::All.indices(3), vec![0, 1, 2]);
        assert_eq!(RowSel::One(1).indices(3), vec![1]);
        assert_eq!(ColSel::All.names(&columns), columns);
        assert_eq!(ColSel::Many(vec!["b".into()]).names(&columns), vec!["b"]);
        assert!(!RowSel::All.is_bound());
        assert!(ColSel::One("a".into()).is_bound());
    }
}
