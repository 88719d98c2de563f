pub mod client;

pub use client::{BackendApiClient, BackendApiConfig};
