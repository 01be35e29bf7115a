//! Infrastructure services

mod experiment_service;

pub use experiment_service::{
    CreateExperimentRequest, ExperimentService, ExperimentServiceConfig, ExperimentServiceTrait,
};
