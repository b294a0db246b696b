//! Persistence for the handheld application.

pub mod config;
