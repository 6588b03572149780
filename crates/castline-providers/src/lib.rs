//! Provider adapter backends for Castline.
//!
//! Provides adapter implementations behind [`castline_core::ProviderAdapter`]:
//! - Dry run (no network, staging and tests)
//! - HTTP relay (forwards to a service that speaks the network's API)

pub mod dry_run;
pub mod error;
pub mod registry;
pub mod relay;

pub use dry_run::DryRunAdapter;
pub use error::ProviderError;
pub use registry::ProviderRegistry;
pub use relay::RelayAdapter;
