//! Singapore bus stop lookup: nearest stops, route resolution, description
//! search and cached live arrivals.

pub mod cache;
pub mod config;
pub mod datamall;
pub mod models;
pub mod state;
pub mod transit;
pub mod web;

pub use state::AppState;
