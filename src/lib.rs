pub mod analysis;
pub mod backup;
pub mod cache;
pub mod config;
pub mod db;
pub mod history;
pub mod identifier;
pub mod models;
pub mod notify;
pub mod optimizer;
pub mod reporter;
pub mod service;
pub mod telemetry;

#[cfg(test)]
mod testing;
