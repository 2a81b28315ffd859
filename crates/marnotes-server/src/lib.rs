//! marnotes HTTP services.
//!
//! Two independent listeners share one process: the JSON document API
//! (optionally sealing every response for the deployment key pair) and the
//! web UI host that serves the compiled single-page application.

pub mod assets;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod ports;
pub mod protection;
pub mod routes;
pub mod state;
pub mod web;
