pub mod config;
pub mod lifecycle;
pub mod notify;
pub mod probe;
pub mod repository;
pub mod service_monitor;
pub mod tracker;
