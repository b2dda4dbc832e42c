pub mod auth;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod tasks;
pub mod tenant;
pub mod wal;
