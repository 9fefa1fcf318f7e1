pub mod auth;
pub mod booking;
pub mod clock;
pub mod config;
pub mod engine;
pub mod http;
pub mod janitor;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod payment;
pub mod wal;
