pub mod bundle;
pub mod commands;
pub mod config;
pub mod crd;
pub mod k8s;
pub mod manifest;
pub mod reconcile;
pub mod telemetry;
pub mod value;
