//! Lazily populated per-coordinate result cache.
//!
//! Each cached cell walks `Unevaluated -> Evaluating -> Evaluated | Error`.
//! Invalidation sends it back to `Unevaluated`, keeping the previous value as
//! [`OldData`] so a later read can revive it without recomputing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use websheet_core::{CellCoord, Dep, DepPattern, SheetError, Value};

#[derive(Debug, Clone, Default)]
pub enum CellState {
    #[default]
    Unevaluated,
    Evaluating,
    Evaluated(Value),
    Error(SheetError),
}

/// Last computed value, kept across an invalidation
#[derive(Debug, Clone)]
pub struct OldData {
    pub value: Value,
    /// Generation at which the value last changed
    pub generation: u64,
    /// Generation at which the value was last known correct
    pub verified_at: u64,
    /// Whether a read may restore it after checking its dependencies
    pub revive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CachedCell {
    pub state: CellState,
    pub generation: u64,
    pub verified_at: u64,
    pub old: Option<OldData>,
}

impl CachedCell {
    pub fn value(&self) -> Option<&Value> {
        match &self.state {
            CellState::Evaluated(v) => Some(v),
            _ => None,
        }
    }

    /// Back to `Unevaluated`; an evaluated value moves to `old`
    pub fn reset(&mut self, revive: bool) {
        match std::mem::take(&mut self.state) {
            CellState::Evaluated(value) => {
                self.old = Some(OldData {
                    value,
                    generation: self.generation,
                    verified_at: self.verified_at,
                    revive,
                });
            }
            _ => {
                if let Some(old) = &mut self.old {
                    old.revive &= revive;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TableCache {
    rows: Vec<HashMap<String, CachedCell>>,
}

/// Cache of one kind of result (cell values, or one user's read permissions)
#[derive(Debug, Clone, Default)]
pub struct CellCache {
    tables: HashMap<String, TableCache>,
}

impl CellCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, coord: &CellCoord) -> Option<&CachedCell> {
        self.tables
            .get(&coord.table)?
            .rows
            .get(coord.row)?
            .get(&coord.column)
    }

    /// The cached cell at `coord`, created `Unevaluated` on first use
    pub fn entry(&mut self, coord: &CellCoord) -> &mut CachedCell {
        let table = self.tables.entry(coord.table.clone()).or_default();
        if table.rows.len() <= coord.row {
            table.rows.resize_with(coord.row + 1, HashMap::new);
        }
        table.rows[coord.row]
            .entry(coord.column.clone())
            .or_default()
    }

    pub fn state(&self, coord: &CellCoord) -> CellState {
        self.get(coord)
            .map(|c| c.state.clone())
            .unwrap_or_default()
    }

    pub fn generation(&self, coord: &CellCoord) -> Option<u64> {
        self.get(coord).map(|c| c.generation)
    }

    /// `Unevaluated -> Evaluating`; hands back the old data for revival
    pub fn begin(&mut self, coord: &CellCoord) -> Option<OldData> {
        let cell = self.entry(coord);
        cell.state = CellState::Evaluating;
        cell.old.clone()
    }

    /// `Evaluating -> Evaluated`
    pub fn finish(&mut self, coord: &CellCoord, value: Value, generation: u64, verified_at: u64) {
        let cell = self.entry(coord);
        cell.state = CellState::Evaluated(value);
        cell.generation = generation;
        cell.verified_at = verified_at;
        cell.old = None;
    }

    /// `Evaluating -> Error`
    pub fn fail(&mut self, coord: &CellCoord, error: SheetError) {
        self.entry(coord).state = CellState::Error(error);
    }

    /// `Evaluating -> Unevaluated` without caching anything (dependency loops)
    pub fn abandon(&mut self, coord: &CellCoord) {
        self.entry(coord).state = CellState::Unevaluated;
    }

    /// Invalidate one coordinate
    pub fn reset(&mut self, coord: &CellCoord, revive: bool) {
        if let Some(cell) = self.get_mut(coord) {
            cell.reset(revive);
        }
    }

    fn get_mut(&mut self, coord: &CellCoord) -> Option<&mut CachedCell> {
        self.tables
            .get_mut(&coord.table)?
            .rows
            .get_mut(coord.row)?
            .get_mut(&coord.column)
    }

    /// Every cached coordinate with its cell
    pub fn cells(&self) -> impl Iterator<Item = (CellCoord, &CachedCell)> {
        self.tables.iter().flat_map(|(table, cache)| {
            cache.rows.iter().enumerate().flat_map(move |(row, cells)| {
                cells
                    .iter()
                    .map(move |(column, cell)| (CellCoord::new(table.clone(), row, column.clone()), cell))
            })
        })
    }

    fn cells_mut(&mut self) -> impl Iterator<Item = (CellCoord, &mut CachedCell)> {
        self.tables.iter_mut().flat_map(|(table, cache)| {
            cache.rows.iter_mut().enumerate().flat_map(move |(row, cells)| {
                cells.iter_mut().map(move |(column, cell)| {
                    (CellCoord::new(table.clone(), row, column.clone()), cell)
                })
            })
        })
    }

    /// Reset every cell in `Error`; returns how many there were
    pub fn reset_errors(&mut self) -> usize {
        let mut count = 0;
        for (_, cell) in self.cells_mut() {
            if matches!(cell.state, CellState::Error(_)) {
                cell.state = CellState::Unevaluated;
                count += 1;
            }
        }
        count
    }

    /// Coordinates whose cached value depends on something `pattern` describes
    pub fn support(&self, pattern: &DepPattern) -> Vec<CellCoord> {
        self.cells()
            .filter(|(_, cell)| {
                cell.value()
                    .map_or(false, |v| v.all_deps().any_matches(pattern))
            })
            .map(|(coord, _)| coord)
            .collect()
    }

    /// Reset the support set of `pattern`; returns how many cells were reset
    pub fn invalidate(&mut self, pattern: &DepPattern, revive: bool) -> usize {
        let support = self.support(pattern);
        for coord in &support {
            self.reset(coord, revive);
        }
        support.len()
    }

    /// Evaluated coordinates carrying a time dependency that expired at `now`
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<(CellCoord, Vec<Dep>)> {
        self.cells()
            .filter_map(|(coord, cell)| {
                let deps: Vec<Dep> = cell
                    .value()?
                    .all_deps()
                    .iter()
                    .filter(|d| d.deadline().map_or(false, |at| at <= now))
                    .cloned()
                    .collect();
                (!deps.is_empty()).then_some((coord, deps))
            })
            .collect()
    }

    /// Reset every cached cell of `table` matching `keep`
    pub fn reset_table_where(
        &mut self,
        table: &str,
        revive: bool,
        mut keep: impl FnMut(usize, &str) -> bool,
    ) {
        if let Some(cache) = self.tables.get_mut(table) {
            for (row, cells) in cache.rows.iter_mut().enumerate() {
                for (column, cell) in cells.iter_mut() {
                    if keep(row, column) {
                        cell.reset(revive);
                    }
                }
            }
        }
    }

    /// Mirror a row insertion: later rows move down by one
    pub fn insert_row(&mut self, table: &str, row: usize) {
        if let Some(cache) = self.tables.get_mut(table) {
            if row <= cache.rows.len() {
                cache.rows.insert(row, HashMap::new());
            }
        }
    }

    /// Mirror a row deletion: later rows move up by one
    pub fn remove_row(&mut self, table: &str, row: usize) {
        if let Some(cache) = self.tables.get_mut(table) {
            if row < cache.rows.len() {
                cache.rows.remove(row);
            }
        }
    }

    pub fn drop_table(&mut self, table: &str) {
        self.tables.remove(table);
    }

    pub fn len(&self) -> usize {
        self.cells().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn coord(row: usize, column: &str) -> CellCoord {
        CellCoord::new("T", row, column)
    }

    fn value_on(dep: &CellCoord) -> Value {
        Value::number(1.0).add_dep(Dep::cell(dep.clone()))
    }

    #[test]
    fn test_state_machine() {
        let mut cache = CellCache::new();
        let c = coord(0, "a");
        assert!(matches!(cache.state(&c), CellState::Unevaluated));

        assert!(cache.begin(&c).is_none());
        assert!(matches!(cache.state(&c), CellState::Evaluating));
        cache.finish(&c, Value::number(2.0), 3, 3);
        assert_eq!(cache.get(&c).unwrap().value().unwrap().canonical(), "2");

        cache.reset(&c, true);
        let old = cache.begin(&c).unwrap();
        assert!(old.revive);
        assert_eq!(old.generation, 3);

        cache.fail(&c, SheetError::Assertion("no".into()));
        assert_eq!(cache.reset_errors(), 1);
        assert!(matches!(cache.state(&c), CellState::Unevaluated));

        cache.begin(&c);
        cache.abandon(&c);
        assert!(matches!(cache.state(&c), CellState::Unevaluated));
    }

    #[test]
    fn test_reset_never_upgrades_revive() {
        let mut cache = CellCache::new();
        let c = coord(0, "a");
        cache.begin(&c);
        cache.finish(&c, Value::number(1.0), 1, 1);
        cache.reset(&c, false);
        cache.reset(&c, true);
        assert!(!cache.get(&c).unwrap().old.as_ref().unwrap().revive);
    }

    #[test]
    fn test_support_set() {
        let mut cache = CellCache::new();
        let input = coord(0, "a");
        for (row, column) in [(0, "b"), (1, "b")] {
            cache.begin(&coord(row, column));
            cache.finish(&coord(row, column), value_on(&input), 1, 1);
        }
        cache.begin(&coord(2, "b"));
        cache.finish(&coord(2, "b"), Value::number(5.0), 1, 1);

        let mut support = cache.support(&DepPattern::cell(&input));
        support.sort();
        assert_eq!(support, vec![coord(0, "b"), coord(1, "b")]);

        assert_eq!(cache.invalidate(&DepPattern::cell(&input), true), 2);
        assert!(cache.get(&coord(0, "b")).unwrap().value().is_none());
        assert!(cache.get(&coord(2, "b")).unwrap().value().is_some());
    }

    #[test]
    fn test_row_mirroring() {
        let mut cache = CellCache::new();
        cache.begin(&coord(1, "a"));
        cache.finish(&coord(1, "a"), Value::number(7.0), 1, 1);

        cache.insert_row("T", 0);
        assert!(cache.get(&coord(1, "a")).is_none());
        assert_eq!(cache.get(&coord(2, "a")).unwrap().value().unwrap().canonical(), "7");

        cache.remove_row("T", 0);
        assert!(cache.get(&coord(1, "a")).is_some());

        cache.drop_table("T");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired() {
        let mut cache = CellCache::new();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        cache.begin(&coord(0, "a"));
        cache.finish(&coord(0, "a"), Value::bool(false).add_dep(Dep::Time { at }), 1, 1);

        assert!(cache.expired(at - chrono::Duration::seconds(1)).is_empty());
        let expired = cache.expired(at);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, coord(0, "a"));
    }
}
