//! Authenticator configuration

use std::{collections::HashMap, path::PathBuf, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Url,
};

use crate::{ClientId, ClientSecret, ConfigurationError, ProfileId, ProfileName};

/// The name under which this authenticator is registered
pub const AUTHENTICATION_TYPE: &str = "crAuth";

/// The metadata service used when none is configured
pub const DEFAULT_METADATA_SERVICE_URL: &str = "http://169.254.169.254";

/// The token exchange service used when none is configured
pub const DEFAULT_EXCHANGE_URL: &str = "https://iam.cloud.ibm.com";

/// The timeout applied to every request when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) const EXCHANGE_PATH: &str = "/identity/token";
pub(crate) const METADATA_TOKEN_PATH: &str = "/instance_identity/v1/token";
pub(crate) const METADATA_API_VERSION: &str = "2022-03-01";
pub(crate) const METADATA_FLAVOR: &str = "ibm";
pub(crate) const IDENTITY_TOKEN_LIFETIME_SECS: u64 = 300;
pub(crate) const CR_TOKEN_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:cr-token";

/// Property names understood by [`ComputeResourceConfig::from_properties()`]
pub mod properties {
    /// Path to a file holding the identity token
    pub const CR_TOKEN_FILENAME: &str = "CR_TOKEN_FILENAME";
    /// Base URL of the instance metadata service
    pub const INSTANCE_METADATA_SERVICE_URL: &str = "INSTANCE_METADATA_SERVICE_URL";
    /// Name of the trusted profile
    pub const IAM_PROFILE_NAME: &str = "IAM_PROFILE_NAME";
    /// ID of the trusted profile
    pub const IAM_PROFILE_ID: &str = "IAM_PROFILE_ID";
    /// Base URL of the token exchange service
    pub const AUTH_URL: &str = "AUTH_URL";
    /// Client ID for the token exchange service
    pub const CLIENT_ID: &str = "CLIENT_ID";
    /// Client secret for the token exchange service
    pub const CLIENT_SECRET: &str = "CLIENT_SECRET";
    /// Whether to skip TLS certificate verification
    pub const AUTH_DISABLE_SSL: &str = "AUTH_DISABLE_SSL";
    /// Scope to request for the access token
    pub const SCOPE: &str = "SCOPE";
}

/// Configuration for a compute resource authenticator
///
/// At least one of the profile name or profile ID must be provided. A
/// client ID and client secret are optional, but must be provided together.
/// Empty strings are treated as if the value had not been provided.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct ComputeResourceConfig {
    identity_token_file: Option<PathBuf>,
    metadata_service_url: Option<String>,
    profile_name: Option<ProfileName>,
    profile_id: Option<ProfileId>,
    client_id: Option<ClientId>,
    client_secret: Option<ClientSecret>,
    url: Option<String>,
    scope: Option<String>,
    disable_tls_verification: bool,
    headers: HashMap<String, String>,
    timeout: Option<Duration>,
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl ComputeResourceConfig {
    /// Constructs an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from a map of named properties and validates it
    ///
    /// See [`properties`] for the recognized names. Unknown names are ignored.
    pub fn from_properties(
        props: Option<&HashMap<String, String>>,
    ) -> Result<Self, ConfigurationError> {
        let props = props.ok_or(ConfigurationError::MissingProperties)?;
        let get = |name: &str| props.get(name).map(String::as_str).unwrap_or_default();

        let config = Self::new()
            .with_identity_token_file(get(properties::CR_TOKEN_FILENAME))
            .with_metadata_service_url(get(properties::INSTANCE_METADATA_SERVICE_URL))
            .with_profile_name(get(properties::IAM_PROFILE_NAME))
            .with_profile_id(get(properties::IAM_PROFILE_ID))
            .with_url(get(properties::AUTH_URL))
            .with_client_id(get(properties::CLIENT_ID))
            .with_client_secret(get(properties::CLIENT_SECRET))
            .with_scope(get(properties::SCOPE))
            .with_tls_verification_disabled(
                get(properties::AUTH_DISABLE_SSL).eq_ignore_ascii_case("true"),
            );

        config.validate()?;
        Ok(config)
    }

    /// Reads the identity token from the given file instead of the metadata service
    pub fn with_identity_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.identity_token_file = if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        };
        self
    }

    /// Sets the base URL of the instance metadata service
    pub fn with_metadata_service_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_service_url = non_empty(url);
        self
    }

    /// Sets the name of the trusted profile
    pub fn with_profile_name(mut self, name: impl Into<String>) -> Self {
        self.profile_name = non_empty(name).map(ProfileName::from);
        self
    }

    /// Sets the ID of the trusted profile
    pub fn with_profile_id(mut self, id: impl Into<String>) -> Self {
        self.profile_id = non_empty(id).map(ProfileId::from);
        self
    }

    /// Sets the client ID used to authenticate to the token exchange service
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = non_empty(client_id).map(ClientId::from);
        self
    }

    /// Sets the client secret used to authenticate to the token exchange service
    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = non_empty(client_secret).map(ClientSecret::from);
        self
    }

    /// Sets the base URL of the token exchange service
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = non_empty(url);
        self
    }

    /// Sets the scope requested for the access token
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = non_empty(scope);
        self
    }

    /// Disables TLS certificate verification for all requests
    ///
    /// Only appropriate for test environments.
    pub fn with_tls_verification_disabled(mut self, disabled: bool) -> Self {
        self.disable_tls_verification = disabled;
        self
    }

    /// Adds a header sent with every token exchange request
    ///
    /// Custom headers take precedence over default headers, including `Host`.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces all custom headers sent with token exchange requests
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the timeout that bounds each request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The identity token file, if configured
    pub fn identity_token_file(&self) -> Option<&std::path::Path> {
        self.identity_token_file.as_deref()
    }

    /// The configured metadata service URL
    pub fn metadata_service_url(&self) -> Option<&str> {
        self.metadata_service_url.as_deref()
    }

    /// The configured profile name
    pub fn profile_name(&self) -> Option<&ProfileName> {
        self.profile_name.as_ref()
    }

    /// The configured profile ID
    pub fn profile_id(&self) -> Option<&ProfileId> {
        self.profile_id.as_ref()
    }

    /// The configured client ID
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    /// The configured client secret
    pub fn client_secret(&self) -> Option<&ClientSecret> {
        self.client_secret.as_ref()
    }

    /// The configured token exchange URL
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// The configured scope
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Whether TLS certificate verification is disabled
    pub fn tls_verification_disabled(&self) -> bool {
        self.disable_tls_verification
    }

    /// The custom headers sent with token exchange requests
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The timeout that bounds each request
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Checks that the configuration is usable
    ///
    /// A profile name or ID is required, and a client ID and secret must be
    /// given together. Beyond those rules, the metadata service and exchange
    /// URLs must parse and every custom header must be a legal HTTP header,
    /// so a configuration that would only fail once a request is built is
    /// rejected here instead.
    ///
    /// Never performs network activity and may be called any number of times.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.profile_name.is_none() && self.profile_id.is_none() {
            return Err(ConfigurationError::MissingProfile);
        }

        if self.client_id.is_some() != self.client_secret.is_some() {
            return Err(ConfigurationError::IncompleteClientCredentials);
        }

        self.exchange_url()?;
        self.metadata_token_url()?;
        self.header_map()?;

        Ok(())
    }

    pub(crate) fn exchange_url(&self) -> Result<Url, ConfigurationError> {
        let base = self.url.as_deref().unwrap_or(DEFAULT_EXCHANGE_URL);
        join_url(base, EXCHANGE_PATH)
    }

    pub(crate) fn metadata_token_url(&self) -> Result<Url, ConfigurationError> {
        let base = self
            .metadata_service_url
            .as_deref()
            .unwrap_or(DEFAULT_METADATA_SERVICE_URL);
        let mut url = join_url(base, METADATA_TOKEN_PATH)?;
        url.query_pairs_mut()
            .append_pair("version", METADATA_API_VERSION);
        Ok(url)
    }

    pub(crate) fn header_map(&self) -> Result<HeaderMap, ConfigurationError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let invalid = || ConfigurationError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }

    pub(crate) fn build_client(&self) -> Result<reqwest::Client, ConfigurationError> {
        reqwest::Client::builder()
            .user_agent(concat!("crauth/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout())
            .danger_accept_invalid_certs(self.disable_tls_verification)
            .build()
            .map_err(ConfigurationError::HttpClient)
    }
}

fn join_url(base: &str, path: &str) -> Result<Url, ConfigurationError> {
    let joined = format!("{}{}", base.trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|source| ConfigurationError::InvalidUrl {
        url: base.to_owned(),
        source,
    })
}
