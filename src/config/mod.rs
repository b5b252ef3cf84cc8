//! Pipeline configuration
//!
//! `schema` holds the serde types, `store` persists them as JSON.

mod schema;
mod store;

pub use schema::*;
pub use store::{ConfigChange, ConfigStore};
