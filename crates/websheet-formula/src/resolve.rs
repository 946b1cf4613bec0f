//! Deepening lazy table references into data, and censoring for display.

use websheet_core::{
    CellCoord, ColSel, Dep, DepSet, Rendered, RowSel, SheetError, TableRef, Value, ValueKind,
};

use crate::context::{SheetContext, TableShape};

pub(crate) fn shape_of(ctx: &dyn SheetContext, table: &str) -> Result<TableShape, SheetError> {
    ctx.table_shape(table)
        .ok_or_else(|| SheetError::NoSuchTable(table.to_string()))
}

/// Replace every table reference inside `value` with the data it points at.
///
/// Resolving an already resolved value returns an equal value.
pub fn resolve(value: Value, ctx: &mut dyn SheetContext) -> Result<Value, SheetError> {
    match value.kind {
        ValueKind::Scalar(s) => Ok(Value {
            kind: ValueKind::Scalar(s),
            deps: value.deps,
        }),
        ValueKind::TableRef(table_ref) => Ok(resolve_ref(&table_ref, ctx)?.add_deps(&value.deps)),
        ValueKind::List(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve(item, ctx)?);
            }
            Ok(Value {
                kind: ValueKind::List(resolved),
                deps: value.deps,
            })
        }
        ValueKind::Tuple(fields) => {
            let mut resolved = Vec::with_capacity(fields.len());
            for (name, item) in fields {
                resolved.push((name, resolve(item, ctx)?));
            }
            Ok(Value {
                kind: ValueKind::Tuple(resolved),
                deps: value.deps,
            })
        }
    }
}

fn resolve_ref(table_ref: &TableRef, ctx: &mut dyn SheetContext) -> Result<Value, SheetError> {
    let shape = shape_of(ctx, &table_ref.table)?;

    let row = match &table_ref.row {
        RowSel::One(row) => *row,
        _ => {
            let (rows, deps) = row_refs(table_ref, &shape);
            let mut items = Vec::with_capacity(rows.len());
            for row in rows {
                items.push(resolve(row, ctx)?);
            }
            return Ok(Value::list(items).add_deps(&deps));
        }
    };
    if row >= shape.rows {
        return Err(SheetError::IndexOutOfBounds {
            index: row,
            len: shape.rows,
        });
    }

    match &table_ref.col {
        ColSel::One(column) => {
            if !shape.has_column(column) {
                return Err(SheetError::MissingField(column.clone()));
            }
            let value = ctx.cell_value(&CellCoord::new(table_ref.table.clone(), row, column.clone()))?;
            resolve(value, ctx)
        }
        columns => {
            let mut fields = Vec::new();
            for column in columns.names(&shape.columns) {
                let cell = TableRef {
                    table: table_ref.table.clone(),
                    row: RowSel::One(row),
                    col: ColSel::One(column.clone()),
                };
                fields.push((column, resolve_ref(&cell, ctx)?));
            }
            Ok(Value::tuple(fields))
        }
    }
}

/// Split a reference with an unbound or multi-row axis into one lazy
/// reference per row.
///
/// The returned dependencies make the result sensitive to row insertion and
/// deletion when every row of the table was taken.
pub fn row_refs(table_ref: &TableRef, shape: &TableShape) -> (Vec<Value>, DepSet) {
    let rows: Vec<Value> = table_ref
        .row
        .indices(shape.rows)
        .into_iter()
        .map(|row| {
            Value::table_ref(TableRef {
                table: table_ref.table.clone(),
                row: RowSel::One(row),
                col: table_ref.col.clone(),
            })
        })
        .collect();

    let mut deps = DepSet::new();
    if !table_ref.row.is_bound() {
        for column in table_ref.col.names(&shape.columns) {
            deps.insert(Dep::Row {
                table: table_ref.table.clone(),
                column,
            });
        }
    }
    (rows, deps)
}

/// Whether `user` may read every enforced cell dependency in `deps`
pub fn readable(deps: &DepSet, user: &str, ctx: &mut dyn SheetContext) -> Result<bool, SheetError> {
    for coord in deps.iter().filter_map(Dep::enforced_coord) {
        if !ctx.can_read(user, coord)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Render a resolved value for `user`, replacing every node with an
/// unreadable dependency by the censored sentinel
pub fn censor(value: &Value, user: &str, ctx: &mut dyn SheetContext) -> Result<Rendered, SheetError> {
    if !readable(&value.deps, user, ctx)? {
        return Ok(Rendered::Censored);
    }

    Ok(match &value.kind {
        ValueKind::Scalar(s) => Rendered::from_scalar(s),
        ValueKind::TableRef(t) => Rendered::Text(format!("&{}", t)),
        ValueKind::List(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for item in items {
                rendered.push(censor(item, user, ctx)?);
            }
            Rendered::List(rendered)
        }
        ValueKind::Tuple(fields) => {
            let mut rendered = Vec::with_capacity(fields.len());
            for (name, item) in fields {
                rendered.push((name.clone(), censor(item, user, ctx)?));
            }
            Rendered::Tuple(rendered)
        }
    })
}
