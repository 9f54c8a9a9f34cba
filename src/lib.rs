#![forbid(unsafe_code)]

//! Stackwire wires service capability requirements to interchangeable
//! providers and deploys the resulting configuration onto Docker or
//! Kubernetes targets.

pub mod adapters;
pub mod api;
pub mod app;
pub mod domain;
pub mod infrastructure;
pub mod ports;

pub use app::AppController;
pub use domain::{AppConfig, DomainError};
