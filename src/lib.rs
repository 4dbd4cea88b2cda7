pub mod artifacts;
pub mod burn;
pub mod config;
pub mod decoder;
pub mod diff;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod report;
pub mod rpc;
pub mod sampler;
pub mod scanner;
pub mod source;
pub mod token;
