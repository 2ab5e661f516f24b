//! HTTP API: the HR and Payroll gateways, configuration and middleware.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
