//! Operation events in, response envelopes out
//!
//! [`request`] parses an event into a typed operation, [`router`] runs it
//! against the orchestrators and [`response`] shapes the envelope. [`server`]
//! exposes the router over HTTP.

#![deny(missing_docs)]

pub mod request;
pub mod response;
pub mod router;
pub mod server;

pub use request::{AgentEvent, Operation, ParsedRequest, Property};
pub use response::AgentResponse;
pub use router::RequestRouter;
pub use server::{app, start_server, AppState};
