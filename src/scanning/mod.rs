//! Scanning on top of the protocol layer.
//!
//! - [`Scanner`]: blocking-style single scans with retry
//! - [`AsyncScanner`]: background worker with a freshest-wins queue
//! - [`GlazeClient`]: scoped open/read/close convenience

pub mod async_scanner;
pub mod client;
pub mod queue;
pub mod scanner;
pub mod waveform;
pub mod worker;

pub use async_scanner::AsyncScanner;
pub use client::GlazeClient;
pub use queue::FreshestQueue;
pub use scanner::Scanner;
pub use waveform::{TimestampedWaveform, UnprocessedWaveform};
pub use worker::{HealthReport, WorkerRequest};
