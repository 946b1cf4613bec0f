//! Invalidation after mutations, and time-trigger polling.

use std::collections::BTreeSet;
use std::iter;
use tracing::{debug, info, warn};

use websheet_core::{CellCoord, Dep, DepPattern, OWNER_COLUMN};
use websheet_formula::SheetContext;

use crate::cache::CellCache;
use crate::sheet::Sheet;
use crate::table::{PermKind, PermTarget};

/// A mutation that already happened to the input tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    CreateTable { table: String },
    DeleteTable { table: String },
    Write { coord: CellCoord },
    WritePerm {
        table: String,
        kind: PermKind,
        target: PermTarget,
    },
    WriteOwner { table: String, row: usize },
    AddRow { table: String, row: usize },
    DeleteRow { table: String, row: usize },
}

impl Sheet {
    fn caches_mut(&mut self) -> impl Iterator<Item = &mut CellCache> {
        iter::once(&mut self.output).chain(self.permissions.values_mut())
    }

    /// Reset the support set of `pattern` in every cache
    fn invalidate(&mut self, pattern: &DepPattern, revive: bool) -> usize {
        self.caches_mut()
            .map(|cache| cache.invalidate(pattern, revive))
            .sum()
    }

    // A cell's source changed: its dependents may revive, the cell itself may not.
    fn invalidate_write(&mut self, coord: &CellCoord) -> usize {
        let reset = self.invalidate(&DepPattern::cell(coord), true);
        self.output.reset(coord, false);
        reset
    }

    /// Bring the caches in line with a mutation
    pub(crate) fn trigger(&mut self, event: TriggerEvent) {
        self.generation += 1;
        let generation = self.generation;

        let errors: usize = self.caches_mut().map(CellCache::reset_errors).sum();

        let reset = match &event {
            TriggerEvent::CreateTable { table } => {
                self.structure.insert(table.clone(), generation);
                0
            }
            TriggerEvent::DeleteTable { table } => {
                for cache in self.caches_mut() {
                    cache.drop_table(table);
                }
                self.structure.insert(table.clone(), generation);
                self.invalidate(&DepPattern::table(table), false)
            }
            TriggerEvent::Write { coord } => self.invalidate_write(coord),
            TriggerEvent::WritePerm {
                table,
                kind: PermKind::Read,
                target,
            } => {
                for cache in self.permissions.values_mut() {
                    cache.reset_table_where(table, false, |_, column| match target {
                        PermTarget::Row => true,
                        PermTarget::Column(c) => c == column,
                    });
                }
                0
            }
            // write/init/add/del formulas are evaluated on demand, never cached
            TriggerEvent::WritePerm { .. } => 0,
            TriggerEvent::WriteOwner { table, row } => {
                let columns = self
                    .tables
                    .get(table)
                    .map(|t| t.columns.clone())
                    .unwrap_or_default();
                let mut reset = 0;
                for column in columns {
                    reset += self.invalidate_write(&CellCoord::new(table.clone(), *row, column));
                }
                let owner = CellCoord::new(table.clone(), *row, OWNER_COLUMN);
                reset + self.invalidate(&DepPattern::cell(&owner), false)
            }
            TriggerEvent::AddRow { table, row } => {
                let row = *row;
                for cache in self.caches_mut() {
                    cache.insert_row(table, row);
                    cache.reset_table_where(table, false, |r, _| r > row);
                }
                self.structure.insert(table.clone(), generation);
                self.invalidate(&DepPattern::rows_from(table, row), false)
            }
            TriggerEvent::DeleteRow { table, row } => {
                let row = *row;
                for cache in self.caches_mut() {
                    cache.remove_row(table, row);
                    cache.reset_table_where(table, false, |r, _| r >= row);
                }
                self.structure.insert(table.clone(), generation);
                self.invalidate(&DepPattern::rows_from(table, row), false)
            }
        };

        debug!(generation, errors, reset, ?event, "caches invalidated");
    }

    /// Expire time dependencies that have passed.
    ///
    /// Cells guarded by an expired `AFTER`/`TRIGGER` are reset together with
    /// their support sets, and the cells holding a `TRIGGER` are re-evaluated.
    /// Returns the number of expired cells.
    pub fn poll_time(&mut self) -> usize {
        let now = self.now();

        let mut fired = BTreeSet::new();
        let mut expired_cells = Vec::new();
        for (coord, deps) in self.output.expired(now) {
            for dep in deps {
                if let Dep::Trigger { cell, .. } = dep {
                    fired.insert(cell);
                }
            }
            expired_cells.push(coord);
        }
        let expired_permissions: Vec<(String, CellCoord)> = self
            .permissions
            .iter()
            .flat_map(|(user, cache)| {
                cache
                    .expired(now)
                    .into_iter()
                    .map(move |(coord, _)| (user.clone(), coord))
            })
            .collect();

        let expired = expired_cells.len() + expired_permissions.len();
        if expired == 0 {
            return 0;
        }
        self.generation += 1;

        for (user, coord) in &expired_permissions {
            if let Some(cache) = self.permissions.get_mut(user) {
                cache.reset(coord, false);
            }
        }
        for coord in &expired_cells {
            self.output.reset(coord, false);
            self.invalidate(&DepPattern::cell(coord), true);
        }

        info!(expired, triggers = fired.len(), "time dependencies expired");
        for cell in fired {
            if let Err(error) = self.output_value(&cell) {
                warn!(cell = %cell, %error, "triggered cell failed");
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::{Mail, Mailer};
    use crate::SheetOptions;
    use chrono::{Duration, TimeZone, Utc};
    use std::cell::RefCell;
    use std::rc::Rc;
    use websheet_core::{Rendered, SheetError};

    #[derive(Clone, Default)]
    struct Outbox(Rc<RefCell<Vec<Mail>>>);

    impl Mailer for Outbox {
        fn send(&mut self, mail: &Mail) -> Result<(), SheetError> {
            self.0.borrow_mut().push(mail.clone());
            Ok(())
        }
    }

    fn sheet(columns: &[&str]) -> Sheet {
        let mut sheet = Sheet::default();
        sheet
            .create_table(
                "alice",
                "T",
                "",
                columns.iter().map(|c| c.to_string()).collect(),
                None,
            )
            .unwrap();
        sheet.add_row("alice", "T", None).unwrap();
        sheet
    }

    fn get(sheet: &mut Sheet, row: usize, column: &str) -> Rendered {
        sheet.get_cell("alice", "T", row, column).unwrap()
    }

    #[test]
    fn test_write_invalidates_dependents() {
        let mut sheet = sheet(&["a", "b"]);
        sheet.write_cell("alice", "T", 0, "a", "1").unwrap();
        sheet.write_cell("alice", "T", 0, "b", "a + 1").unwrap();
        assert_eq!(get(&mut sheet, 0, "b"), Rendered::Number(2.0));

        sheet.write_cell("alice", "T", 0, "a", "10").unwrap();
        assert_eq!(get(&mut sheet, 0, "b"), Rendered::Number(11.0));
    }

    #[test]
    fn test_fix_survives_writes() {
        let mut sheet = sheet(&["a", "b"]);
        sheet.write_cell("alice", "T", 0, "a", "1").unwrap();
        sheet.write_cell("alice", "T", 0, "b", "FIX(a + 1)").unwrap();
        assert_eq!(get(&mut sheet, 0, "b"), Rendered::Number(2.0));

        sheet.write_cell("alice", "T", 0, "a", "5").unwrap();
        assert_eq!(get(&mut sheet, 0, "a"), Rendered::Number(5.0));
        assert_eq!(get(&mut sheet, 0, "b"), Rendered::Number(2.0));
    }

    #[test]
    fn test_errors_reset_on_next_mutation() {
        let mut sheet = sheet(&["a", "b"]);
        sheet.write_cell("alice", "T", 0, "a", "ASSERT(b == 1, \"b must be 1\")").unwrap();
        assert_eq!(
            sheet.get_cell("alice", "T", 0, "a").unwrap_err(),
            SheetError::Assertion("b must be 1".into())
        );

        sheet.write_cell("alice", "T", 0, "b", "1").unwrap();
        assert_eq!(get(&mut sheet, 0, "a"), Rendered::Null);
    }

    #[test]
    fn test_whole_column_sees_new_rows() {
        let mut sheet = sheet(&["n", "total"]);
        sheet.write_cell("alice", "T", 0, "n", "2").unwrap();
        sheet.write_cell("alice", "T", 0, "total", "sum(T.n)").unwrap();
        assert_eq!(get(&mut sheet, 0, "total"), Rendered::Number(2.0));

        let row = sheet.add_row("alice", "T", None).unwrap();
        sheet.write_cell("alice", "T", row, "n", "3").unwrap();
        assert_eq!(get(&mut sheet, 0, "total"), Rendered::Number(5.0));

        sheet.delete_row("alice", "T", row).unwrap();
        assert_eq!(get(&mut sheet, 0, "total"), Rendered::Number(2.0));
    }

    #[test]
    fn test_add_then_delete_leaves_no_cache_entries() {
        let mut sheet = sheet(&["a"]);
        sheet.get_output_table("alice", "T").unwrap();

        let row = sheet.add_row("alice", "T", None).unwrap();
        sheet.get_output_table("alice", "T").unwrap();
        let coord = CellCoord::new("T", row, "a");
        assert!(sheet.output_cache().get(&coord).is_some());

        sheet.delete_row("alice", "T", row).unwrap();
        assert_eq!(sheet.table("T").unwrap().rows.len(), 1);
        assert!(sheet.output_cache().get(&coord).is_none());
        assert!(sheet.permission_cache("alice").unwrap().get(&coord).is_none());
    }

    #[test]
    fn test_non_tail_insert_recomputes_shifted_rows() {
        let mut sheet = sheet(&["a", "b"]);
        sheet.add_row("alice", "T", None).unwrap();
        sheet.write_cell("alice", "T", 0, "a", "10").unwrap();
        sheet.write_cell("alice", "T", 1, "b", "T.0.a").unwrap();
        assert_eq!(get(&mut sheet, 1, "b"), Rendered::Number(10.0));

        // the formula now names the inserted row; no stale value survives
        sheet.add_row("alice", "T", Some(0)).unwrap();
        assert_eq!(sheet.table("T").unwrap().cell(2, "b").unwrap().source(), "T.0.a");
        assert_eq!(get(&mut sheet, 2, "b"), Rendered::Null);
        assert_eq!(get(&mut sheet, 1, "a"), Rendered::Number(10.0));
    }

    #[test]
    fn test_write_owner_invalidates_owner_formulas() {
        let mut sheet = sheet(&["secret"]);
        sheet
            .write_perm(
                "alice",
                "T",
                PermKind::Read,
                PermTarget::Column("secret".into()),
                "owner == user",
            )
            .unwrap();
        assert!(!sheet.can_read_cell("bob", "T", 0, "secret").unwrap());

        sheet.write_owner("alice", "T", 0, "bob").unwrap();
        assert!(sheet.can_read_cell("bob", "T", 0, "secret").unwrap());
        assert!(!sheet.can_read_cell("alice", "T", 0, "secret").unwrap());
    }

    #[test]
    fn test_write_perm_resets_permission_cells() {
        let mut sheet = sheet(&["a"]);
        assert!(sheet.can_read_cell("bob", "T", 0, "a").unwrap());
        sheet
            .write_perm("alice", "T", PermKind::Read, PermTarget::Row, "user != \"bob\"")
            .unwrap();
        assert!(!sheet.can_read_cell("bob", "T", 0, "a").unwrap());
    }

    #[test]
    fn test_delete_table_drops_caches() {
        let mut sheet = sheet(&["a"]);
        sheet.create_table("alice", "U", "", vec!["b".into()], None).unwrap();
        sheet.add_row("alice", "U", None).unwrap();
        sheet.write_cell("alice", "T", 0, "a", "1").unwrap();
        sheet.write_cell("alice", "U", 0, "b", "T.0.a + 1").unwrap();
        assert_eq!(
            sheet.get_cell("alice", "U", 0, "b").unwrap(),
            Rendered::Number(2.0)
        );

        sheet.delete_table("alice", "T").unwrap();
        assert!(sheet.output_cache().get(&CellCoord::new("T", 0, "a")).is_none());
        assert_eq!(
            sheet.get_cell("alice", "U", 0, "b").unwrap_err(),
            SheetError::UndefinedIdentifier("T".into())
        );
    }

    #[test]
    fn test_after_expires_on_poll() {
        let mut sheet = sheet(&["open"]);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        sheet.set_clock(Some(start));
        sheet
            .write_cell("alice", "T", 0, "open", "AFTER(\"2024-01-01T13:00:00Z\")")
            .unwrap();
        assert_eq!(get(&mut sheet, 0, "open"), Rendered::Bool(false));
        assert_eq!(sheet.poll_time(), 0);

        let generation = sheet.generation();
        sheet.set_clock(Some(start + Duration::hours(2)));
        assert_eq!(sheet.poll_time(), 1);
        assert_eq!(sheet.generation(), generation + 1);
        assert_eq!(get(&mut sheet, 0, "open"), Rendered::Bool(true));
        assert_eq!(sheet.poll_time(), 0);
    }

    #[test]
    fn test_trigger_fires_mail_once() {
        let options = SheetOptions {
            send_mail: true,
            ..SheetOptions::default()
        };
        let mut sheet = Sheet::new(options);
        let outbox = Outbox::default();
        sheet.set_mailer(outbox.clone());

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        sheet.set_clock(Some(start));
        sheet.create_table("alice", "T", "", vec!["remind".into()], None).unwrap();
        sheet.add_row("alice", "T", None).unwrap();
        sheet
            .write_cell(
                "alice",
                "T",
                0,
                "remind",
                "if TRIGGER(\"13:00\") then MAIL(\"bob@example.com\", \"hi\", \"meeting\") else null",
            )
            .unwrap();

        sheet.get_output_table("alice", "T").unwrap();
        assert!(outbox.0.borrow().is_empty());

        sheet.set_clock(Some(start + Duration::hours(1)));
        assert_eq!(sheet.poll_time(), 1);
        assert_eq!(outbox.0.borrow().len(), 1);
        assert_eq!(outbox.0.borrow()[0].to, "bob@example.com");
        assert_eq!(outbox.0.borrow()[0].body, "meeting");

        assert_eq!(sheet.poll_time(), 0);
        assert_eq!(outbox.0.borrow().len(), 1);
    }
}
