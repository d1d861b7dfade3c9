pub mod error;
pub mod types;
pub mod value;

pub use error::{Phase, Result, UnitError};
pub use types::{AccessMode, IsolationLevel, TxOptions, UnitId, UnitState};
pub use value::{Row, Value};
