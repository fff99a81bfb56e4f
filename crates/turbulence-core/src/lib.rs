pub mod agent;
pub mod config;
pub mod fleet;
pub mod incident;
pub mod models;
pub mod orchestration;
