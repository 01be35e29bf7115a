//! Infrastructure layer - Store, statistics, services and observability

pub mod experiment;
pub mod logging;
pub mod observability;
pub mod services;
