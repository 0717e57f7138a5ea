//! Shared test utilities for integration tests.
//!
//! - `builders`: raw RFC 822 and `InboundMessage` construction
//! - `fakes`: scripted mailboxes and recording collaborators

pub mod builders;
pub mod fakes;

pub use builders::*;
pub use fakes::*;
