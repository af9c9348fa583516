pub mod config;
pub mod jobs;
pub mod lifecycle;
pub mod naming;
pub mod pipeline;
pub mod process;
pub mod terminal;
pub mod transport;
