//! Domain layer for the QAgent orchestration core
//!
//! This module contains core business logic, domain models and the port
//! traits that collaborators and storage adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
