//! Database schema, models and queries

pub mod configurations;
pub mod init;
pub mod models;
pub mod records;

pub use configurations::*;
pub use init::*;
pub use models::*;
pub use records::*;
