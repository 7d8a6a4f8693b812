//! An identity token source backed by the instance metadata service

use async_trait::async_trait;
use reqwest::{header, Url};
use serde::{Deserialize, Serialize};

use super::IdentityTokenSource;
use crate::{
    config::{IDENTITY_TOKEN_LIFETIME_SECS, METADATA_FLAVOR},
    error::CapturedResponse,
    AuthenticationError, IdentityToken,
};

const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";

/// Requests identity tokens from the instance metadata service
#[derive(Debug)]
pub struct MetadataServiceSource {
    client: reqwest::Client,
    token_url: Url,
}

#[derive(Debug, Serialize)]
struct IdentityTokenRequest {
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct IdentityTokenResponse {
    #[serde(default)]
    access_token: Option<IdentityToken>,
}

impl MetadataServiceSource {
    /// Constructs a new metadata service source
    ///
    /// `token_url` is the full URL of the token operation, including the
    /// API version query parameter.
    pub fn new(client: reqwest::Client, token_url: Url) -> Self {
        Self { client, token_url }
    }
}

#[async_trait]
impl IdentityTokenSource for MetadataServiceSource {
    #[tracing::instrument(err, skip_all)]
    async fn identity_token(&self) -> Result<IdentityToken, AuthenticationError> {
        tracing::trace!(token_url = %self.token_url, "requesting identity token from metadata service");

        let resp = self
            .client
            .put(self.token_url.clone())
            .header(header::ACCEPT, "application/json")
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR)
            .json(&IdentityTokenRequest {
                expires_in: IDENTITY_TOKEN_LIFETIME_SECS,
            })
            .send()
            .await
            .map_err(|err| {
                AuthenticationError::transport("error sending request to metadata service", err)
            })?;

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            "received identity token response from metadata service"
        );

        let body = resp.bytes().await.map_err(|err| {
            AuthenticationError::transport("error reading metadata service response", err)
        })?;

        if !status.is_success() {
            return Err(AuthenticationError::status(
                "error requesting identity token from metadata service",
                CapturedResponse::new(status, String::from_utf8_lossy(&body).into_owned()),
            ));
        }

        let resp: IdentityTokenResponse = serde_json::from_slice(&body).map_err(|err| {
            AuthenticationError::response_format(
                "error deserializing metadata service response",
                Some(err.into()),
            )
        })?;

        resp.access_token.ok_or_else(|| {
            AuthenticationError::response_format(
                "metadata service response did not include an access_token",
                None,
            )
        })
    }
}
