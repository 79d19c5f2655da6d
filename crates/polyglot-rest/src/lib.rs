//! Controller REST client: shared-session GETs with a retry ladder,
//! per-call timeout, and diagnostics aggregation.

mod client;
mod ops;
mod url_build;

pub use client::{ControllerConfig, RestClient, RestResult, TransportStatus};
pub use url_build::{decode_url, make_url};
