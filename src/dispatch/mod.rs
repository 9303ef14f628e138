//! The dispatch pipeline: drives one queued message to a terminal status
//! for the attempt.
//!
//! Order of operations is deliberate: eligibility and claim first, then
//! channel-specific address resolution, then credential resolution, and
//! only then the transport call — cheap checks fail before anything
//! touches the network.

mod clients;
mod pipeline;
mod retry;
mod router;
mod transport;

pub use clients::{ClientContact, ClientDirectory, SqlClientDirectory};
pub use pipeline::{DispatchError, DispatchPipeline, DispatchReport};
pub use retry::RetryPolicy;
pub use router::TransportRouter;
pub use transport::{
    GraphTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
