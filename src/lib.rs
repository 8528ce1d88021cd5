pub mod api;
pub mod browser;
pub mod config;
pub mod humanize;
pub mod observability;
pub mod pool;
pub mod queue;
pub mod solver;
pub mod tasks;
