//! Change row cursor module
//!
//! # Overview
//!
//! The cursor module provides:
//! - `ChangeRow` - one captured row of the change log
//! - `ChangeRowCursor` - lazy, ordered, transaction-aware reading of a plan
//! - `CursorOptions` - peek-ahead window and row limit

mod reader;
mod types;

pub use reader::{sort_rows, ChangeRowCursor, CursorOptions};
pub use types::{ChangeRow, CursorStats};
