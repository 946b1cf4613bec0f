pub mod coord;
pub mod dep;
pub mod error;
pub mod value;

pub use coord::{CellCoord, ColSel, RowSel, OWNER_COLUMN};
pub use dep::{Dep, DepKey, DepPattern, DepSet, RowMatch};
pub use error::SheetError;
pub use value::{Rendered, Scalar, TableRef, Value, ValueKind, CENSORED};
