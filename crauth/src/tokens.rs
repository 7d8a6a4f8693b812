use crauth_clock::{Clock, DurationSecs, UnixTime};

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

/// An access token as returned by the exchange, with lifetime information
///
/// Token data is never modified once constructed; a newer token replaces
/// it wholesale.
#[derive(Debug)]
pub struct TokenData {
    access_token: AccessToken,
    refresh_token: Option<RefreshToken>,
    token_type: String,
    expires_in: DurationSecs,
    issued: UnixTime,
    refresh: UnixTime,
    expiration: UnixTime,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and can be used as-is
    Fresh,
    /// The token is still valid, but a replacement should be obtained
    NeedsRefresh,
    /// The token is no longer valid
    Expired,
}

impl TokenData {
    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the refresh token, if one was issued
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Gets the token type, usually `Bearer`
    #[inline]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Gets the validity period reported by the exchange
    #[inline]
    pub fn expires_in(&self) -> DurationSecs {
        self.expires_in
    }

    /// Gets the time that the token was obtained
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time from which the token should be refreshed
    #[inline]
    pub fn refresh(&self) -> UnixTime {
        self.refresh
    }

    /// Gets the time that the token expires
    #[inline]
    pub fn expiration(&self) -> UnixTime {
        self.expiration
    }

    /// Gets the token's lifecycle status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.refresh {
            TokenStatus::Fresh
        } else if time < self.expiration {
            TokenStatus::NeedsRefresh
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets the token's lifecycle status according to the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets how much longer the token would be fresh as of the provided time
    #[inline]
    pub fn until_refresh_at(&self, time: UnixTime) -> DurationSecs {
        self.refresh - time
    }

    /// Gets how much longer the token would be valid as of the provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiration - time
    }
}

/// Configuration for determining when a token should be refreshed
#[derive(Clone, Copy, Debug)]
pub struct TokenLifetimeConfig {
    refresh_fraction: f64,
}

impl Default for TokenLifetimeConfig {
    /// Refreshes once 80% of the token's validity period has elapsed
    fn default() -> Self {
        Self {
            refresh_fraction: 0.8,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration
    ///
    /// A token becomes due for refresh once `refresh_fraction` of its validity
    /// period has elapsed. The fraction is clamped to `0.0..=1.0`.
    pub fn new(refresh_fraction: f64) -> Self {
        let refresh_fraction = if refresh_fraction.is_nan() {
            Self::default().refresh_fraction
        } else {
            refresh_fraction.clamp(0., 1.)
        };

        Self { refresh_fraction }
    }

    /// The fraction of a token's validity period after which it is refreshed
    #[inline]
    pub fn refresh_fraction(&self) -> f64 {
        self.refresh_fraction
    }

    pub(crate) fn create_token(
        &self,
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        token_type: String,
        expires_in: DurationSecs,
        issued: UnixTime,
    ) -> TokenData {
        let expiration = issued + expires_in;
        let refresh = (issued + expires_in * self.refresh_fraction).min(expiration);

        TokenData {
            access_token,
            refresh_token,
            token_type,
            expires_in,
            issued,
            refresh,
            expiration,
        }
    }
}
