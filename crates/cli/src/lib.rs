//! scn-cli: command-line front end for the scenario execution engine.

pub mod cli;
pub mod config;
pub mod logging;
pub mod run;
pub mod server;
