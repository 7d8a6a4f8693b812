//! Authentication for workloads running on a cloud compute resource
//!
//! A compute resource, such as a virtual server instance or a container, can
//! prove its own identity without holding a long-lived secret. This library
//! obtains that short-lived _identity token_, either from a file placed by the
//! platform or from the instance metadata service, exchanges it for an access
//! token bound to a trusted profile, and attaches the access token to
//! outbound requests.
//!
//! Access tokens are cached. A cached token is handed out directly until it
//! becomes stale, after which it continues to be handed out while a single
//! background task obtains a replacement. Callers only wait on the network
//! when no usable token is cached at all.
//!
//! ```
//! use crauth::{ComputeResourceAuthenticator, ComputeResourceConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ComputeResourceConfig::new()
//!     .with_identity_token_file("/var/run/secrets/tokens/vault-token")
//!     .with_profile_name("my-trusted-profile");
//!
//! let authenticator = ComputeResourceAuthenticator::new(config)?;
//!
//! # /* Commented out due to this trying to interact with the world.
//! let mut request = reqwest::Client::new()
//!     .get("https://example.cloud.ibm.com/v1/resources")
//!     .build()?;
//! authenticator.authenticate(&mut request).await?;
//! # */
//! # Ok(())
//! # }
//! ```
//!
//! An authenticator is cheap to clone, and all clones share the same cache, so
//! a single instance should be shared by all of the clients that need it.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authenticator;
mod braids;
mod cache;
pub mod config;
pub mod error;
pub mod exchange;
pub mod sources;
mod tokens;

pub use authenticator::ComputeResourceAuthenticator;
pub use braids::*;
pub use config::ComputeResourceConfig;
pub use error::{AuthenticationError, CapturedResponse, ConfigurationError, ErrorKind};
pub use tokens::{TokenData, TokenLifetimeConfig, TokenStatus};

pub use crauth_clock::{Clock, DurationSecs, System, TestClock, UnixTime};
