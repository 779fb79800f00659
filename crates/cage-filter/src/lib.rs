//! Agent Cage Filters
//!
//! Allow-list checks for everything that crosses the sandbox boundary:
//!
//! - outbound requests ([`is_transmission_allowed`]) and their payloads ([`decode_payload`])
//! - inbound responses ([`filter_response`])
//! - guide markup ([`filter_guide_tag`])
//!
//! Every check returns a [`FilterResult`]; [`Enforcement`] decides whether a
//! failure aborts the call or is only logged.

#![warn(unreachable_pub)]

mod clock;
mod error;
mod guide;
mod mode;
mod payload;
mod request;
mod response;
mod transmissions;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{FilterError, FilterResult};
pub use guide::filter_guide_tag;
pub use mode::Enforcement;
pub use payload::{decode_payload, error_report, RequestBody};
pub use request::{is_transmission_allowed, FilterContext, DEFAULT_CT_EPSILON_MS};
pub use response::{filter_response, FilteredResponse, RawResponse, EXPECTED_RESPONSE_KEYS};
pub use transmissions::{Transmission, TransmissionLog, DEFAULT_TRANSMISSION_CAPACITY};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
