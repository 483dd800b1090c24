pub mod archive;
pub mod config;
pub mod error;
pub mod io;
pub mod merge;
pub mod project;
pub mod session;
