pub mod app;
pub mod classify;
pub mod codec;
pub mod companions;
pub mod config;
pub mod dataset;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod output;
pub mod runs;
pub mod sidecar;
pub mod transfer;
