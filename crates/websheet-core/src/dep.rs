use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::coord::CellCoord;

/// What a computed value depends on.
///
/// `Normal` ties a result to one cell's current value. `recalculate == false`
/// (set by `FIX`) exempts it from invalidation; `enforce == false` (set by
/// `TRUST`) exempts it from read-permission checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Dep {
    Normal {
        coord: CellCoord,
        recalculate: bool,
        enforce: bool,
    },
    /// Sensitivity to row insertion/deletion in `table` as seen through `column`
    Row { table: String, column: String },
    /// Valid only while `now < at`
    Time { at: DateTime<Utc> },
    /// Like `Time`, but the owning cell is actively re-evaluated once `at` passes
    Trigger {
        at: DateTime<Utc>,
        owner: String,
        cell: CellCoord,
    },
}

/// Identity of a dependency inside a [`DepSet`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    Cell(CellCoord),
    Row(String, String),
    Time(DateTime<Utc>),
    Trigger(DateTime<Utc>, String, CellCoord),
}

impl Dep {
    /// A recalculating, enforced dependency on one cell
    pub fn cell(coord: CellCoord) -> Self {
        Dep::Normal {
            coord,
            recalculate: true,
            enforce: true,
        }
    }

    pub fn key(&self) -> DepKey {
        match self {
            Dep::Normal { coord, .. } => DepKey::Cell(coord.clone()),
            Dep::Row { table, column } => DepKey::Row(table.clone(), column.clone()),
            Dep::Time { at } => DepKey::Time(*at),
            Dep::Trigger { at, owner, cell } => DepKey::Trigger(*at, owner.clone(), cell.clone()),
        }
    }

    /// Coordinate of a cell dependency
    pub fn coord(&self) -> Option<&CellCoord> {
        match self {
            Dep::Normal { coord, .. } => Some(coord),
            _ => None,
        }
    }

    /// Coordinate of a cell dependency that is subject to permission checks
    pub fn enforced_coord(&self) -> Option<&CellCoord> {
        match self {
            Dep::Normal {
                coord,
                enforce: true,
                ..
            } => Some(coord),
            _ => None,
        }
    }

    /// Expiry of time-based dependencies
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            Dep::Time { at } | Dep::Trigger { at, .. } => Some(*at),
            _ => None,
        }
    }

    /// Whether this dependency belongs to the support set described by `pattern`
    pub fn matches(&self, pattern: &DepPattern) -> bool {
        match self {
            Dep::Normal {
                coord, recalculate, ..
            } => {
                *recalculate
                    && coord.table == pattern.table
                    && pattern.rows.accepts(coord.row)
                    && pattern.column.as_ref().map_or(true, |c| *c == coord.column)
            }
            Dep::Row { table, column } => {
                pattern.structural
                    && *table == pattern.table
                    && pattern.column.as_ref().map_or(true, |c| c == column)
            }
            Dep::Time { .. } | Dep::Trigger { .. } => false,
        }
    }

    // Two paths reaching the same cell: keep the stricter flags.
    fn absorb(&mut self, other: &Dep) {
        if let (
            Dep::Normal {
                recalculate,
                enforce,
                ..
            },
            Dep::Normal {
                recalculate: r2,
                enforce: e2,
                ..
            },
        ) = (self, other)
        {
            *recalculate |= *r2;
            *enforce |= *e2;
        }
    }
}

/// Row selector of a [`DepPattern`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowMatch {
    Any,
    Exactly(usize),
    From(usize),
}

impl RowMatch {
    pub fn accepts(&self, row: usize) -> bool {
        match self {
            RowMatch::Any => true,
            RowMatch::Exactly(r) => row == *r,
            RowMatch::From(r) => row >= *r,
        }
    }
}

/// Describes the coordinates touched by a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepPattern {
    pub table: String,
    pub rows: RowMatch,
    pub column: Option<String>,
    /// Structural changes also match `Dep::Row`
    pub structural: bool,
}

impl DepPattern {
    /// A value change of one cell
    pub fn cell(coord: &CellCoord) -> Self {
        DepPattern {
            table: coord.table.clone(),
            rows: RowMatch::Exactly(coord.row),
            column: Some(coord.column.clone()),
            structural: false,
        }
    }

    /// Row insertion or deletion at `row`; every later row moves
    pub fn rows_from(table: &str, row: usize) -> Self {
        DepPattern {
            table: table.to_string(),
            rows: RowMatch::From(row),
            column: None,
            structural: true,
        }
    }

    /// Any coordinate of `table`
    pub fn table(table: &str) -> Self {
        DepPattern {
            table: table.to_string(),
            rows: RowMatch::Any,
            column: None,
            structural: true,
        }
    }
}

/// Deduplicated, insertion-ordered set of dependencies
#[derive(Debug, Clone, Default)]
pub struct DepSet {
    deps: Vec<Dep>,
    index: HashMap<DepKey, usize>,
}

impl DepSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(dep: Dep) -> Self {
        let mut set = Self::new();
        set.insert(dep);
        set
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dep> {
        self.deps.iter()
    }

    pub fn contains_key(&self, key: &DepKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &DepKey) -> Option<&Dep> {
        self.index.get(key).map(|&i| &self.deps[i])
    }

    /// Insert `dep`, merging flags with an existing entry of the same identity
    pub fn insert(&mut self, dep: Dep) {
        let key = dep.key();
        match self.index.get(&key) {
            Some(&i) => self.deps[i].absorb(&dep),
            None => {
                self.index.insert(key, self.deps.len());
                self.deps.push(dep);
            }
        }
    }

    pub fn extend(&mut self, other: &DepSet) {
        for dep in &other.deps {
            self.insert(dep.clone());
        }
    }

    /// Clear `recalculate` on every cell dependency (`FIX`)
    pub fn freeze(&mut self) {
        for dep in &mut self.deps {
            if let Dep::Normal { recalculate, .. } = dep {
                *recalculate = false;
            }
        }
    }

    /// Clear `enforce` on the cell dependencies accepted by `relax` (`TRUST`)
    pub fn relax_enforce(&mut self, mut relax: impl FnMut(&CellCoord) -> bool) {
        for dep in &mut self.deps {
            if let Dep::Normal { coord, enforce, .. } = dep {
                if relax(coord) {
                    *enforce = false;
                }
            }
        }
    }

    pub fn any_matches(&self, pattern: &DepPattern) -> bool {
        self.deps.iter().any(|d| d.matches(pattern))
    }

    /// Earliest time-based expiry in the set
    pub fn earliest_deadline(&self) -> Option<DateTime<Utc>> {
        self.deps.iter().filter_map(Dep::deadline).min()
    }
}

impl PartialEq for DepSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .deps
                .iter()
                .all(|d| other.get(&d.key()).map_or(false, |o| o == d))
    }
}

impl FromIterator<Dep> for DepSet {
    fn from_iter<I: IntoIterator<Item = Dep>>(iter: I) -> Self {
        let mut set = DepSet::new();
        for dep in iter {
            set.insert(dep);
        }
        set
    }
}
