//! An identity token source that reads a local file

use std::path::PathBuf;

use async_trait::async_trait;

use super::IdentityTokenSource;
use crate::{AuthenticationError, IdentityToken};

/// Reads the identity token from a file, ignoring surrounding whitespace
#[derive(Debug)]
pub struct FileIdentitySource {
    path: PathBuf,
}

impl FileIdentitySource {
    /// Constructs a new file identity source
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl IdentityTokenSource for FileIdentitySource {
    #[tracing::instrument(err, skip_all)]
    async fn identity_token(&self) -> Result<IdentityToken, AuthenticationError> {
        let data = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            AuthenticationError::identity_source(
                format!(
                    "unable to read identity token file {}: {}",
                    self.path.display(),
                    err
                ),
                Some(err.into()),
            )
        })?;

        let token = data.trim();
        if token.is_empty() {
            return Err(AuthenticationError::identity_source(
                format!("identity token file {} is empty", self.path.display()),
                None,
            ));
        }

        tracing::debug!(path = %self.path.display(), "read identity token from file");
        Ok(IdentityToken::from(token.to_owned()))
    }
}
