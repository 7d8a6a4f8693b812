//! Sources for the compute resource's identity token

use async_trait::async_trait;

use crate::{AuthenticationError, ComputeResourceConfig, ConfigurationError, IdentityToken};

pub mod file;
pub mod metadata;

pub use file::FileIdentitySource;
pub use metadata::MetadataServiceSource;

/// An asynchronous source of identity tokens
#[async_trait]
pub trait IdentityTokenSource: Send + Sync {
    /// Obtains an identity token for the compute resource
    async fn identity_token(&self) -> Result<IdentityToken, AuthenticationError>;
}

/// The identity source selected by a configuration
///
/// A configured identity token file takes precedence over the metadata service.
#[derive(Debug)]
pub enum IdentitySource {
    /// Read the token from a local file
    File(FileIdentitySource),
    /// Request the token from the instance metadata service
    MetadataService(MetadataServiceSource),
}

impl IdentitySource {
    pub(crate) fn from_config(
        config: &ComputeResourceConfig,
        client: reqwest::Client,
    ) -> Result<Self, ConfigurationError> {
        if let Some(path) = config.identity_token_file() {
            Ok(Self::File(FileIdentitySource::new(path.to_owned())))
        } else {
            Ok(Self::MetadataService(MetadataServiceSource::new(
                client,
                config.metadata_token_url()?,
            )))
        }
    }
}

#[async_trait]
impl IdentityTokenSource for IdentitySource {
    async fn identity_token(&self) -> Result<IdentityToken, AuthenticationError> {
        match self {
            Self::File(source) => source.identity_token().await,
            Self::MetadataService(source) => source.identity_token().await,
        }
    }
}
