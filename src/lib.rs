pub mod archive;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod project;
pub mod regions;
pub mod table;
