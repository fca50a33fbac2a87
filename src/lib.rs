pub mod config;
pub mod error;
pub mod location;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod sink;
pub mod source;
