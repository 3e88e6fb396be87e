pub mod cache;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod output;
pub mod publish;
pub mod registry;
pub mod zenodo;
