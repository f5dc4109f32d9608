pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod git;
pub mod remote;
pub mod runner;
pub mod scan;
pub mod snapshot;
pub mod store;
