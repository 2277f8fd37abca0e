//! Display helpers shared by command output.

pub mod table;

pub use table::{key_value_table, list_table, render_list};
