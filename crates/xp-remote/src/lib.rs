//! # xp-remote
//!
//! Delegating a whole sweep to another machine.
//!
//! The client serializes configurations, datasets, pool size and seed into
//! one request blob named after a fresh UUID, hands it to a [`Transport`],
//! asks the runner to execute it, and reads back `result_<name>`, an ordered
//! list of [`AggregateResult`](xp_types::AggregateResult)s. On the runner,
//! [`serve_request`] turns the blob back into an ordinary local sweep.

mod experimenter;
mod request;
mod runner;
mod transport;

pub use experimenter::RemoteExperimenter;
pub use request::{decode_results, encode_results, request_name, result_name, SweepRequest};
pub use runner::serve_request;
pub use transport::{LocalTransport, ScriptTransport, ScriptTransportConfig, Transport};
