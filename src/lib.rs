//! Booking lifecycle and room availability engine for hotel properties,
//! speaking the Postgres wire protocol.

pub mod auth;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod property;
pub mod sql;
pub mod sweeper;
pub mod tls;
pub mod wal;
pub mod wire;
