use std::sync::Arc;

use crauth_clock::{Clock, System};
use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::{
    cache::{RefreshGuard, TokenCache},
    config::AUTHENTICATION_TYPE,
    exchange::TokenExchangeClient,
    sources::{IdentitySource, IdentityTokenSource},
    AccessToken, AuthenticationError, ComputeResourceConfig, ConfigurationError, TokenData,
    TokenLifetimeConfig, TokenStatus,
};

/// Authenticates outbound requests as a compute resource
///
/// The authenticator obtains an identity token for the compute resource,
/// exchanges it for an access token, and caches that access token. Once a
/// cached token is due for refresh, callers continue to receive it while a
/// single background task obtains a replacement. Only when no usable token
/// is cached does a caller wait on the network.
///
/// Clones share the same cache.
#[derive(Debug)]
pub struct ComputeResourceAuthenticator<C = System> {
    inner: Arc<Inner<C>>,
    lifetime: TokenLifetimeConfig,
}

impl<C> Clone for ComputeResourceAuthenticator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            lifetime: self.lifetime,
        }
    }
}

#[derive(Debug)]
struct Inner<C> {
    config: ComputeResourceConfig,
    identity: IdentitySource,
    exchange: TokenExchangeClient,
    cache: TokenCache,
    clock: C,
}

impl ComputeResourceAuthenticator {
    /// Constructs a new authenticator using the system clock
    ///
    /// The configuration is validated first; no network activity takes place.
    pub fn new(config: ComputeResourceConfig) -> Result<Self, ConfigurationError> {
        Self::with_clock(config, System)
    }
}

impl<C: Clock + 'static> ComputeResourceAuthenticator<C> {
    /// Constructs a new authenticator which uses `clock` for all lifetime decisions
    pub fn with_clock(config: ComputeResourceConfig, clock: C) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let client = config.build_client()?;
        Self::with_client(config, client, clock)
    }

    /// Constructs a new authenticator which sends its requests through `client`
    ///
    /// The client is used as-is, so the configured timeout and TLS
    /// verification setting are not applied; the caller is responsible for
    /// configuring them on the client.
    pub fn with_client(
        config: ComputeResourceConfig,
        client: reqwest::Client,
        clock: C,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let identity = IdentitySource::from_config(&config, client.clone())?;
        let exchange = TokenExchangeClient::from_config(&config, client)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                identity,
                exchange,
                cache: TokenCache::new(),
                clock,
            }),
            lifetime: TokenLifetimeConfig::default(),
        })
    }

    /// Sets when tokens obtained by this authenticator are considered due for refresh
    ///
    /// Tokens already cached keep the lifetime they were created with.
    pub fn with_lifetime_config(mut self, lifetime: TokenLifetimeConfig) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// The validated configuration
    pub fn config(&self) -> &ComputeResourceConfig {
        &self.inner.config
    }

    /// The name of this authentication scheme
    pub fn authentication_type(&self) -> &'static str {
        AUTHENTICATION_TYPE
    }

    /// Gets a usable access token
    ///
    /// Returns the cached token immediately while it is fresh. Once it is due
    /// for refresh, it is still returned immediately, and a background
    /// refresh is started if one is not already running. An empty or expired
    /// cache is filled before returning, and any failure doing so is returned.
    pub async fn get_token(&self) -> Result<AccessToken, AuthenticationError> {
        let now = self.inner.clock.now();

        match self.inner.cache.snapshot() {
            Some(token) => match token.token_status_at(now) {
                TokenStatus::Fresh => {
                    tracing::trace!("using cached token");
                    return Ok(token.access_token().to_owned());
                }
                TokenStatus::NeedsRefresh => {
                    if let Some(guard) = self.inner.cache.try_begin_refresh() {
                        tracing::debug!(
                            until_expired = token.until_expired_at(now).0,
                            "cached token is stale, refreshing in background"
                        );
                        self.spawn_refresh(guard);
                    } else {
                        tracing::trace!("cached token is stale, refresh already in progress");
                    }
                    return Ok(token.access_token().to_owned());
                }
                TokenStatus::Expired => {
                    tracing::debug!("cached token has expired, requesting new token");
                }
            },
            None => {
                tracing::debug!("no token cached, requesting new token");
            }
        }

        let token = self.inner.refresh(self.lifetime).await?;
        Ok(token.access_token().to_owned())
    }

    /// Sets the bearer token in the `Authorization` header of a request
    ///
    /// On failure the request is left unmodified.
    pub async fn authenticate(
        &self,
        request: &mut reqwest::Request,
    ) -> Result<(), AuthenticationError> {
        self.authenticate_headers(request.headers_mut()).await
    }

    /// Sets the bearer token in the `Authorization` header of a header map
    ///
    /// On failure the headers are left unmodified.
    pub async fn authenticate_headers(
        &self,
        headers: &mut HeaderMap,
    ) -> Result<(), AuthenticationError> {
        let token = self.get_token().await?;
        headers.insert(header::AUTHORIZATION, bearer_header(&token)?);
        Ok(())
    }

    /// Obtains a new token without consulting or updating the cache
    pub async fn request_token(&self) -> Result<TokenData, AuthenticationError> {
        self.inner.request(self.lifetime).await
    }

    /// A snapshot of the currently cached token, if any
    pub fn token_data(&self) -> Option<Arc<TokenData>> {
        self.inner.cache.snapshot()
    }

    /// Whether a background refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        self.inner.cache.is_refreshing()
    }

    fn spawn_refresh(&self, guard: RefreshGuard) {
        let inner = Arc::clone(&self.inner);
        let lifetime = self.lifetime;

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(error) = inner.refresh(lifetime).await {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "background token refresh failed, continuing to use cached token"
                );
            }
        });
    }
}

impl<C: Clock> Inner<C> {
    async fn request(&self, lifetime: TokenLifetimeConfig) -> Result<TokenData, AuthenticationError> {
        let identity_token = self.identity.identity_token().await?;
        let response = self.exchange.exchange(&identity_token).await?;

        Ok(lifetime.create_token(
            response.access_token,
            response.refresh_token,
            response.token_type,
            response.expires_in,
            self.clock.now(),
        ))
    }

    async fn refresh(
        &self,
        lifetime: TokenLifetimeConfig,
    ) -> Result<Arc<TokenData>, AuthenticationError> {
        let token = self.request(lifetime).await?;

        tracing::info!(
            issued = token.issued().0,
            refresh = token.refresh().0,
            expiration = token.expiration().0,
            "installing new access token"
        );

        Ok(self.cache.install(token))
    }
}

fn bearer_header(token: &AccessToken) -> Result<HeaderValue, AuthenticationError> {
    let mut value = HeaderValue::try_from(format!("Bearer {}", token.as_str())).map_err(|err| {
        AuthenticationError::response_format(
            "access token cannot be used in an authorization header",
            Some(err.into()),
        )
    })?;
    value.set_sensitive(true);
    Ok(value)
}
