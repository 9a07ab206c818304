pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod local_store;
pub mod model;
pub mod reference;
pub mod registry;
pub mod scaffold;
pub mod sync;
pub mod wit_pkg;
