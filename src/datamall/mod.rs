//! LTA DataMall upstream: live arrivals and full dataset downloads.

pub mod arrivals;
pub mod client;

pub use arrivals::ArrivalService;
pub use client::{DataMallClient, UpstreamError};
