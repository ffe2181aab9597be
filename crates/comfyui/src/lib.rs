//! Job server client library.
//!
//! Provides the [`transport::JobTransport`] contract with a direct REST
//! implementation and a relay implementation, the job graph builders, and
//! history parsing with artifact extraction and error classification.

pub mod api;
pub mod history;
pub mod relay;
pub mod transport;
pub mod workflow;
