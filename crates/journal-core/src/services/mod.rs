//! Services shared by every journal front end.

mod database;

pub use database::DatabaseService;
