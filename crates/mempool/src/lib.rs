//! mempool library: churn simulator driving the pool registry the way a
//! proxy's event loop and scheduler would.

pub mod app;
pub mod classes;
pub mod config;
pub mod errors;
pub mod report;
pub mod workload;
