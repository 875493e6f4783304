mod repository;
mod schema;

pub use repository::{format_timestamp, Repository};
