//! Free-text filter language typed into the browser's search box.

pub mod compile;
pub mod date;
pub mod parser;

pub use compile::{add_textual_filter, add_textual_filter_at};
pub use parser::{parse_filter, FilterElement, FilterExpression, MatchMode};
