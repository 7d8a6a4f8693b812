//! Exchanges identity tokens for access tokens

use crauth_clock::DurationSecs;
use reqwest::{
    header::{self, HeaderMap},
    Url,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::CR_TOKEN_GRANT_TYPE, error::CapturedResponse, AccessToken, AuthenticationError,
    ClientId, ClientSecret, ComputeResourceConfig, ConfigurationError, IdentityTokenRef,
    ProfileId, ProfileName, RefreshToken,
};

/// The profile that the exchanged access token is issued for
#[derive(Clone, Debug)]
pub enum Profile {
    /// Identify the profile by ID
    Id(ProfileId),
    /// Identify the profile by name
    Name(ProfileName),
}

impl Profile {
    /// Selects the profile to request from a configuration
    ///
    /// When both are configured, the profile ID is used.
    fn from_config(config: &ComputeResourceConfig) -> Result<Self, ConfigurationError> {
        match (config.profile_id(), config.profile_name()) {
            (Some(id), _) => Ok(Self::Id(id.clone())),
            (None, Some(name)) => Ok(Self::Name(name.clone())),
            (None, None) => Err(ConfigurationError::MissingProfile),
        }
    }
}

/// The response of a successful token exchange
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// The access token
    pub access_token: AccessToken,
    /// The token type, usually `Bearer`
    #[serde(default)]
    pub token_type: String,
    /// How long the access token is valid for
    #[serde(default)]
    pub expires_in: DurationSecs,
    /// The time at which the exchange service considers the token expired
    #[serde(default)]
    pub expiration: Option<i64>,
    /// A refresh token, if issued
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
}

#[derive(Serialize)]
struct ExchangeForm<'a> {
    grant_type: &'static str,
    cr_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'a str>,
}

/// A client for the token exchange service
#[derive(Debug)]
pub struct TokenExchangeClient {
    client: reqwest::Client,
    token_url: Url,
    profile: Profile,
    credentials: Option<(ClientId, ClientSecret)>,
    scope: Option<String>,
    headers: HeaderMap,
}

impl TokenExchangeClient {
    /// Constructs an exchange client from a configuration
    pub fn from_config(
        config: &ComputeResourceConfig,
        client: reqwest::Client,
    ) -> Result<Self, ConfigurationError> {
        let credentials = match (config.client_id(), config.client_secret()) {
            (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
            (None, None) => None,
            _ => return Err(ConfigurationError::IncompleteClientCredentials),
        };

        Ok(Self {
            client,
            token_url: config.exchange_url()?,
            profile: Profile::from_config(config)?,
            credentials,
            scope: config.scope().map(ToOwned::to_owned),
            headers: config.header_map()?,
        })
    }

    /// The URL that identity tokens are exchanged at
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Exchanges an identity token for an access token
    #[tracing::instrument(
        err,
        skip(self, identity_token),
        fields(
            token_url = %self.token_url,
            profile = ?self.profile,
            client_id = tracing::field::Empty,
        ),
    )]
    pub async fn exchange(
        &self,
        identity_token: &IdentityTokenRef,
    ) -> Result<TokenResponse, AuthenticationError> {
        tracing::trace!("requesting access token from exchange service");

        let (profile_id, profile_name) = match &self.profile {
            Profile::Id(id) => (Some(id.as_str()), None),
            Profile::Name(name) => (None, Some(name.as_str())),
        };

        let form = ExchangeForm {
            grant_type: CR_TOKEN_GRANT_TYPE,
            cr_token: identity_token.as_str(),
            profile_id,
            profile_name,
            scope: self.scope.as_deref(),
        };

        let mut req = self
            .client
            .post(self.token_url.clone())
            .header(header::ACCEPT, "application/json")
            .form(&form);

        if let Some((id, secret)) = &self.credentials {
            tracing::Span::current().record("client_id", id.as_str());
            req = req.basic_auth(id.as_str(), Some(secret.as_str()));
        }

        // Applied last so that custom headers override the defaults
        let resp = req
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|err| {
                AuthenticationError::transport("error sending request to exchange service", err)
            })?;

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            "received token response from exchange service"
        );

        let body = resp.bytes().await.map_err(|err| {
            AuthenticationError::transport("error reading exchange service response", err)
        })?;

        if !status.is_success() {
            return Err(AuthenticationError::status(
                "error requesting token from exchange service",
                CapturedResponse::new(status, String::from_utf8_lossy(&body).into_owned()),
            ));
        }

        let resp: TokenResponse = serde_json::from_slice(&body).map_err(|err| {
            AuthenticationError::response_format(
                "error deserializing token body from exchange service",
                Some(err.into()),
            )
        })?;

        tracing::debug!(
            has_refresh_token = resp.refresh_token.is_some(),
            expires_in = resp.expires_in.0,
            "received access token"
        );

        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    use super::*;
    use crate::{ErrorKind, IdentityToken};

    fn config_for(server: &Server) -> ComputeResourceConfig {
        ComputeResourceConfig::new().with_url(server.url("/").to_string())
    }

    fn token_body(access_token: &str) -> serde_json::Value {
        json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3600,
            "expiration": 1_700_003_600,
            "refresh_token": "refresh-1",
        })
    }

    fn cr_token() -> IdentityToken {
        IdentityToken::from_static("cr-token-1")
    }

    #[tokio::test]
    async fn exchanges_with_profile_name() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/identity/token"),
                request::headers(contains(("accept", "application/json"))),
                request::headers(contains((
                    "content-type",
                    "application/x-www-form-urlencoded"
                ))),
                request::body(url_decoded(contains(("grant_type", CR_TOKEN_GRANT_TYPE)))),
                request::body(url_decoded(contains(("cr_token", "cr-token-1")))),
                request::body(url_decoded(contains(("profile_name", "iam-user-123")))),
                request::body(url_decoded(not(contains(key("profile_id"))))),
                request::body(url_decoded(not(contains(key("scope"))))),
                request::headers(not(contains(key("authorization")))),
            ])
            .respond_with(json_encoded(token_body("A1"))),
        );

        let config = config_for(&server).with_profile_name("iam-user-123");
        let client = TokenExchangeClient::from_config(&config, reqwest::Client::new()).unwrap();
        let resp = client.exchange(&cr_token()).await.unwrap();

        assert_eq!(resp.access_token.as_str(), "A1");
        assert_eq!(resp.token_type, "Bearer");
        assert_eq!(resp.expires_in, DurationSecs(3600));
        assert_eq!(resp.expiration, Some(1_700_003_600));
        assert_eq!(
            resp.refresh_token.as_ref().map(|t| t.as_str()),
            Some("refresh-1")
        );
    }

    #[tokio::test]
    async fn profile_id_takes_precedence_and_scope_is_passed_through() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/identity/token"),
                request::body(url_decoded(contains(("profile_id", "iam-id-123")))),
                request::body(url_decoded(not(contains(key("profile_name"))))),
                request::body(url_decoded(contains(("scope", "scope1")))),
            ])
            .respond_with(json_encoded(token_body("A1"))),
        );

        let config = config_for(&server)
            .with_profile_name("iam-user-123")
            .with_profile_id("iam-id-123")
            .with_scope("scope1");
        let client = TokenExchangeClient::from_config(&config, reqwest::Client::new()).unwrap();

        client.exchange(&cr_token()).await.unwrap();
    }

    #[tokio::test]
    async fn client_credentials_use_basic_auth() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/identity/token"),
                // base64("client-id-1:client-secret-1")
                request::headers(contains((
                    "authorization",
                    "Basic Y2xpZW50LWlkLTE6Y2xpZW50LXNlY3JldC0x"
                ))),
            ])
            .respond_with(json_encoded(token_body("A1"))),
        );

        let config = config_for(&server)
            .with_profile_name("iam-user-123")
            .with_client_id("client-id-1")
            .with_client_secret("client-secret-1");
        let client = TokenExchangeClient::from_config(&config, reqwest::Client::new()).unwrap();

        client.exchange(&cr_token()).await.unwrap();
    }

    #[tokio::test]
    async fn custom_headers_override_defaults() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/identity/token"),
                request::headers(contains(("user-header-1", "Value-1"))),
                request::headers(contains(("host", "iam.cloud.ibm.com"))),
            ])
            .respond_with(json_encoded(token_body("A1"))),
        );

        let config = config_for(&server)
            .with_profile_name("iam-user-123")
            .with_header("User-Header-1", "Value-1")
            .with_header("Host", "iam.cloud.ibm.com");
        let client = TokenExchangeClient::from_config(&config, reqwest::Client::new()).unwrap();

        client.exchange(&cr_token()).await.unwrap();
    }

    #[tokio::test]
    async fn error_status_captures_the_body() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/identity/token"))
                .respond_with(status_code(400).body("Sorry, bad request!")),
        );

        let config = config_for(&server).with_profile_name("iam-user-123");
        let client = TokenExchangeClient::from_config(&config, reqwest::Client::new()).unwrap();
        let err = client.exchange(&cr_token()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Status);
        assert_eq!(err.response().unwrap().status().as_u16(), 400);
        assert!(err.to_string().contains("Sorry, bad request!"));
    }

    #[tokio::test]
    async fn missing_access_token_is_a_format_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/identity/token"))
                .respond_with(json_encoded(json!({ "token_type": "Bearer", "expires_in": 3600 }))),
        );

        let config = config_for(&server).with_profile_name("iam-user-123");
        let client = TokenExchangeClient::from_config(&config, reqwest::Client::new()).unwrap();
        let err = client.exchange(&cr_token()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ResponseFormat);
        assert!(err.response().is_none());
    }

    #[test]
    fn token_url_appends_the_exchange_path() {
        let config = ComputeResourceConfig::new()
            .with_profile_name("iam-user-123")
            .with_url("https://iam.example.com/");
        let client = TokenExchangeClient::from_config(&config, reqwest::Client::new()).unwrap();

        assert_eq!(
            client.token_url().as_str(),
            "https://iam.example.com/identity/token"
        );
    }

    #[test]
    fn incomplete_credentials_are_rejected() {
        let config = ComputeResourceConfig::new()
            .with_profile_name("iam-user-123")
            .with_client_id("client-id-1");
        let err = TokenExchangeClient::from_config(&config, reqwest::Client::new()).unwrap_err();

        assert!(matches!(err, ConfigurationError::IncompleteClientCredentials));
    }
}
