//! # fw-connectors
//!
//! Vendor incident sources for Feed Warden.
//!
//! This crate provides the HTTP plumbing shared by all vendors and one
//! [`fw_core::IncidentSource`] implementation per supported product.

pub mod http;
pub mod secure_string;
pub mod sources;
pub mod testing;
pub mod traits;

pub use http::{HttpClient, RateLimitConfig, ResponseCache};
pub use secure_string::SecureString;
pub use traits::{
    AuthConfig, Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
};

pub use sources::{
    DeepInstinctConfig, DeepInstinctSource, GraphMailConfig, GraphMailSource, IronscalesConfig,
    IronscalesSource, NcurionConfig, NcurionSource, UnifiVideoConfig, UnifiVideoSource,
    VendorRecord,
};
