//! Pure domain types: the logical input model and the connection-state
//! vocabulary shared by all transports.

pub mod connection;
pub mod input;
