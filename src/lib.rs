//! A Unix shell with pipelines, redirection and job control.

#[cfg(not(unix))]
compile_error!("jobsh needs a Unix platform: it relies on process groups and terminal control");

pub mod builtins;
pub mod cli;
pub mod context;
pub mod editor;
pub mod error;
pub mod expander;
pub mod job;
pub mod jobs;
pub mod parser;
pub mod redirect;
pub mod search;
pub mod shell;
pub mod status;
pub mod terminal;
pub mod unit;
