//! Rental booking engine: per-vehicle availability, the rental lifecycle,
//! authorization, and a durable commit boundary around every mutation.

pub mod authz;
pub mod config;
pub mod directory;
pub mod engine;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod service;
pub mod wal;

pub use engine::{BookingError, Engine, ErrorKind};
