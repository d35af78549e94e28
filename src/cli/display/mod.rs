//! Display helpers shared by command output.

pub mod table;

pub use table::{colorize_mode, list_table, render_list};
