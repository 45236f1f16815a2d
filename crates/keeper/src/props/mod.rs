//! Property blobs stored as node data.
//!
//! `document` parses and edits the text without losing layout; `store`
//! reads and writes it against the coordination store.

mod document;
mod store;

pub use document::{PropertiesDocument, parse_map};
pub use store::{get_properties, get_properties_watched, set_properties};
