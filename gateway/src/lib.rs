//! Client library for the Greensight hosted backend
//!
//! This crate defines the gateway traits used by the sync layer, the row
//! schemas of the backend's tables, and two implementations:
//! - [`RestGateway`]: talks to the hosted service over HTTP
//! - [`mock::MemoryGateway`]: in-process tables for tests (feature `mock`)

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod rest;
pub mod rows;
pub mod traits;

pub use error::{GatewayError, GatewayResult};
pub use rest::RestGateway;
pub use traits::{
    Auth, AuthChange, AuthEvent, Gateway, Patch, Query, Record, Session, Storage, Table, Tables,
    User,
};
