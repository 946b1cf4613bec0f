//! Read permissions (cached per user) and write/add/del authorization.

use tracing::debug;

use websheet_core::{CellCoord, SheetError, Value, OWNER_COLUMN};
use websheet_formula::{parse_cell, Evaluator};

use crate::sheet::{cell_env, row_env, table_env, CacheId, Sheet};
use crate::table::{Formula, PermKind, PermTarget};

impl Sheet {
    pub(crate) fn is_admin(&self, user: &str) -> bool {
        user == self.options.admin_user
    }

    fn admin_override(&self, user: &str) -> bool {
        self.options.admin_override && self.is_admin(user)
    }

    /// Whether `user` may observe `coord`.
    ///
    /// The permission cell's own dependencies must be readable too. A
    /// dependency on `coord` itself, or on a coordinate in `whitelist`, is
    /// taken as satisfied so mutually referencing permissions terminate.
    pub(crate) fn can_read_with(
        &mut self,
        user: &str,
        coord: &CellCoord,
        whitelist: &mut Vec<CellCoord>,
    ) -> Result<bool, SheetError> {
        if coord.column == OWNER_COLUMN {
            return Ok(true);
        }
        if self.check_coord(coord).is_err() {
            return Ok(false);
        }

        let permission = self.lookup(CacheId::Permission(user), coord)?;
        let mut allowed = permission.as_permission()?;

        if allowed {
            whitelist.push(coord.clone());
            let depth = whitelist.len();
            for dep in permission.all_deps().iter() {
                let Some(target) = dep.enforced_coord() else {
                    continue;
                };
                if target == coord || whitelist.contains(target) {
                    continue;
                }
                if !self.can_read_with(user, target, whitelist)? {
                    allowed = false;
                    break;
                }
            }
            whitelist.truncate(depth - 1);
        }

        if !allowed && self.admin_override(user) {
            debug!(user, cell = %coord, "admin override");
            return Ok(true);
        }
        Ok(allowed)
    }

    /// Evaluate the column and row `write` formulas for `user` at `coord`.
    ///
    /// Formulas mentioning `value` see the value being written (or, for
    /// display checks without a new source, the current one); a failure to
    /// evaluate the new source is returned as an error.
    pub(crate) fn authorize_write(
        &mut self,
        user: &str,
        coord: &CellCoord,
        source: Option<&str>,
    ) -> Result<bool, SheetError> {
        if self.admin_override(user) {
            return Ok(true);
        }

        let (formulas, mut env) = {
            let table = self.table(&coord.table)?;
            let write = &table.perms.write;
            let mut formulas = Vec::with_capacity(2);
            for formula in [write.column(&coord.column), write.row.as_ref()]
                .into_iter()
                .flatten()
            {
                formulas.push(formula.ast()?);
            }
            let env = cell_env(table, coord.row, &coord.column).with("user", Value::string(user));
            (formulas, env)
        };

        if formulas.iter().any(|ast| ast.mentions("value")) {
            let value = match source {
                Some(source) => {
                    let expr = parse_cell(source, &coord.label())?;
                    Evaluator::new(self, user).eval_resolved(&expr, &env)?
                }
                None => self.output_value(coord).unwrap_or_else(|_| Value::null()),
            };
            env.bind("value", value);
        }

        let mut evaluator = Evaluator::new(self, user);
        for ast in formulas {
            if !evaluator.eval_resolved(&ast, &env)?.as_permission()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate a table's row-level `add` or `del` formula for `user`
    pub(crate) fn authorize_row(
        &mut self,
        user: &str,
        table: &str,
        kind: PermKind,
        row: usize,
    ) -> Result<bool, SheetError> {
        if self.admin_override(user) {
            return Ok(true);
        }

        let (ast, env) = {
            let t = self.table(table)?;
            let ast = t.perms.get(kind, &PermTarget::Row).map(Formula::ast).transpose()?;
            let env = match kind {
                PermKind::Del => row_env(t, row),
                _ => table_env(t).with("rowIndex", Value::number(row as f64)),
            };
            (ast, env.with("user", Value::string(user)))
        };

        match ast {
            Some(ast) => Evaluator::new(self, user)
                .eval_resolved(&ast, &env)?
                .as_permission(),
            None => Ok(true),
        }
    }

    /// Permission and ownership edits belong to the table owner and the admin
    pub(crate) fn require_owner(&self, user: &str, table: &str) -> Result<(), SheetError> {
        let t = self.table(table)?;
        if user == t.owner || self.is_admin(user) {
            Ok(())
        } else {
            Err(SheetError::PermissionDenied(format!(
                "{} does not own table {}",
                user, table
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::sheet::Sheet;
    use crate::table::{PermKind, PermTarget};
    use websheet_core::{CellCoord, Rendered, SheetError};

    fn sheet() -> Sheet {
        let mut sheet = Sheet::default();
        sheet
            .create_table(
                "alice",
                "T",
                "",
                vec!["public".into(), "secret".into()],
                None,
            )
            .unwrap();
        sheet.add_row("alice", "T", None).unwrap();
        sheet.write_cell("alice", "T", 0, "secret", "42").unwrap();
        sheet
            .write_perm(
                "alice",
                "T",
                PermKind::Read,
                PermTarget::Column("secret".into()),
                "owner == user",
            )
            .unwrap();
        sheet
    }

    #[test]
    fn test_owner_relative_read() {
        let mut sheet = sheet();
        assert!(sheet.can_read_cell("alice", "T", 0, "secret").unwrap());
        assert!(!sheet.can_read_cell("bob", "T", 0, "secret").unwrap());
        assert!(sheet.can_read_cell("bob", "T", 0, "public").unwrap());

        let table = sheet.get_output_table("bob", "T").unwrap();
        assert_eq!(table.rows[0][1], Rendered::Censored);
        assert_eq!(table.rows[0][1].to_string(), "[[censored]]");
        let table = sheet.get_output_table("alice", "T").unwrap();
        assert_eq!(table.rows[0][1], Rendered::Number(42.0));
    }

    #[test]
    fn test_admin_override() {
        let mut sheet = sheet();
        assert!(sheet.can_read_cell("admin", "T", 0, "secret").unwrap());
        // the permission was still evaluated and cached for the admin
        let cache = sheet.permission_cache("admin").unwrap();
        assert!(cache.get(&CellCoord::new("T", 0, "secret")).is_some());
    }

    #[test]
    fn test_permission_dependencies_must_be_readable() {
        let mut sheet = sheet();
        // readable only by those who can read `secret`
        sheet
            .write_perm(
                "alice",
                "T",
                PermKind::Read,
                PermTarget::Column("public".into()),
                "secret == 42",
            )
            .unwrap();
        assert!(sheet.can_read_cell("alice", "T", 0, "public").unwrap());
        assert!(!sheet.can_read_cell("bob", "T", 0, "public").unwrap());
    }

    #[test]
    fn test_mutual_permissions_terminate() {
        let mut sheet = Sheet::default();
        sheet
            .create_table("alice", "M", "", vec!["x".into(), "y".into()], None)
            .unwrap();
        sheet.add_row("alice", "M", None).unwrap();
        sheet.write_cell("alice", "M", 0, "x", "1").unwrap();
        sheet.write_cell("alice", "M", 0, "y", "1").unwrap();
        for (column, other) in [("x", "y == 1"), ("y", "x == 1")] {
            sheet
                .write_perm("alice", "M", PermKind::Read, PermTarget::Column(column.into()), other)
                .unwrap();
        }
        assert!(sheet.can_read_cell("bob", "M", 0, "x").unwrap());
        assert!(sheet.can_read_cell("bob", "M", 0, "y").unwrap());
    }

    #[test]
    fn test_non_boolean_permission_is_an_error() {
        let mut sheet = sheet();
        sheet
            .write_perm("alice", "T", PermKind::Read, PermTarget::Row, "1")
            .unwrap();
        assert!(matches!(
            sheet.can_read_cell("bob", "T", 0, "public"),
            Err(SheetError::RuntimeType(_))
        ));
    }

    #[test]
    fn test_write_formula_sees_new_value() {
        let mut sheet = sheet();
        sheet
            .write_perm(
                "alice",
                "T",
                PermKind::Write,
                PermTarget::Column("public".into()),
                "value > 0",
            )
            .unwrap();

        sheet.write_cell("bob", "T", 0, "public", "5").unwrap();
        assert!(matches!(
            sheet.write_cell("bob", "T", 0, "public", "-1"),
            Err(SheetError::PermissionDenied(_))
        ));
        assert!(matches!(
            sheet.write_cell("bob", "T", 0, "public", "1 +"),
            Err(SheetError::Parse { .. })
        ));
        assert_eq!(
            sheet.get_cell("bob", "T", 0, "public").unwrap(),
            Rendered::Number(5.0)
        );
    }

    #[test]
    fn test_row_write_and_delete_formulas() {
        let mut sheet = sheet();
        sheet
            .write_perm("alice", "T", PermKind::Write, PermTarget::Row, "owner == user")
            .unwrap();
        sheet
            .write_perm("alice", "T", PermKind::Del, PermTarget::Row, "owner == user")
            .unwrap();

        assert!(matches!(
            sheet.write_cell("bob", "T", 0, "public", "1"),
            Err(SheetError::PermissionDenied(_))
        ));
        assert!(matches!(
            sheet.delete_row("bob", "T", 0),
            Err(SheetError::PermissionDenied(_))
        ));
        sheet.write_cell("alice", "T", 0, "public", "1").unwrap();
        sheet.delete_row("alice", "T", 0).unwrap();
        assert_eq!(sheet.table("T").unwrap().rows.len(), 0);
    }

    #[test]
    fn test_add_formula() {
        let mut sheet = sheet();
        sheet
            .write_perm("alice", "T", PermKind::Add, PermTarget::Row, "user == tableOwner")
            .unwrap();
        assert!(matches!(
            sheet.add_row("bob", "T", None),
            Err(SheetError::PermissionDenied(_))
        ));
        assert_eq!(sheet.add_row("alice", "T", None).unwrap(), 1);
    }

    #[test]
    fn test_only_owner_edits_permissions() {
        let mut sheet = sheet();
        assert!(matches!(
            sheet.write_perm("bob", "T", PermKind::Read, PermTarget::Row, "false"),
            Err(SheetError::PermissionDenied(_))
        ));
        sheet
            .write_perm("admin", "T", PermKind::Read, PermTarget::Row, "false")
            .unwrap();
        assert!(!sheet.can_read_cell("alice", "T", 0, "public").unwrap());
    }
}
