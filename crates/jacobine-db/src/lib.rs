//! Database Gateway (C1): prepared-statement CRUD with transparent
//! reconnect on idle-timeout loss, one connection per consumer process.

mod gateway;

pub use gateway::{Db, DbGateway, SqlRow, UsageOrDatabaseError};
