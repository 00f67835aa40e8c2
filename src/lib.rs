pub mod actuator;
pub mod capture;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod sync;
pub mod transport;
