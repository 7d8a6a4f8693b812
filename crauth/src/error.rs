//! Errors produced while configuring or authenticating

use std::{error, fmt};

use reqwest::StatusCode;
use thiserror::Error;

type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// The configuration violates an invariant and cannot be used
///
/// These errors are detected before any network activity takes place and
/// are never retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Neither a profile name nor a profile ID was provided
    #[error("a profile name or a profile ID must be specified")]
    MissingProfile,
    /// Only one half of the client ID/secret pair was provided
    #[error("a client ID and client secret must be specified together")]
    IncompleteClientCredentials,
    /// No configuration properties were supplied
    #[error("no configuration properties were provided")]
    MissingProperties,
    /// A custom header has an illegal name or value
    #[error("custom header `{name}` is not a valid HTTP header")]
    InvalidHeader {
        /// The offending header name
        name: String,
    },
    /// A configured URL could not be parsed
    #[error("`{url}` is not a valid URL")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// The parse failure
        source: url::ParseError,
    },
    /// The HTTP client could not be constructed from the configuration
    #[error("unable to construct HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

/// The general category of an [`AuthenticationError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The identity token file could not be read or was empty
    IdentitySource,
    /// A request could not be sent or its response could not be read
    Transport,
    /// A request did not complete within the configured timeout
    Timeout,
    /// The server answered with a non-success status code
    Status,
    /// The server answered successfully, but the body lacked required fields
    ResponseFormat,
}

/// An HTTP response captured from a failed request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedResponse {
    status: StatusCode,
    body: String,
}

impl CapturedResponse {
    pub(crate) fn new(status: StatusCode, body: String) -> Self {
        Self { status, body }
    }

    /// The status code of the response
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The body of the response, as text
    #[inline]
    pub fn body(&self) -> &str {
        &self.body
    }
}

/// A failure to obtain an access token
///
/// Every failure surfaced while obtaining or attaching a token is reported
/// as this error. Callers can inspect [`kind()`][Self::kind()] and, for
/// failures caused by a non-success status, the captured
/// [`response()`][Self::response()].
#[derive(Debug)]
pub struct AuthenticationError {
    kind: ErrorKind,
    message: String,
    response: Option<CapturedResponse>,
    source: Option<BoxError>,
}

impl AuthenticationError {
    pub(crate) fn identity_source(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self {
            kind: ErrorKind::IdentitySource,
            message: message.into(),
            response: None,
            source,
        }
    }

    pub(crate) fn transport(message: impl Into<String>, source: reqwest::Error) -> Self {
        let kind = if source.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Transport
        };

        Self {
            kind,
            message: message.into(),
            response: None,
            source: Some(source.into()),
        }
    }

    pub(crate) fn status(message: impl Into<String>, response: CapturedResponse) -> Self {
        Self {
            kind: ErrorKind::Status,
            message: message.into(),
            response: Some(response),
            source: None,
        }
    }

    pub(crate) fn response_format(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self {
            kind: ErrorKind::ResponseFormat,
            message: message.into(),
            response: None,
            source,
        }
    }

    /// The category of the failure
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// A human-readable description of the failure
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The response that caused the failure, if the server answered with a
    /// non-success status
    #[inline]
    pub fn response(&self) -> Option<&CapturedResponse> {
        self.response.as_ref()
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(response) = &self.response {
            write!(f, " (status {}): {}", response.status.as_u16(), response.body)?;
        }
        Ok(())
    }
}

impl error::Error for AuthenticationError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn error::Error + 'static))
    }
}
