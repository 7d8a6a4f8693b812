//! Middleware to automatically attach compute resource authorization to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`ComputeResourceMiddleware`] in the middleware stack to use
//! the access token provided by a [`ComputeResourceAuthenticator`] for each
//! outbound request.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! ```
//! use crauth::{ComputeResourceAuthenticator, ComputeResourceConfig};
//! use crauth_reqwest::ComputeResourceMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let authenticator = ComputeResourceAuthenticator::new(
//!     ComputeResourceConfig::new().with_profile_name("my-trusted-profile"),
//! )?;
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(ComputeResourceMiddleware::new(authenticator))
//!     .build();
//!
//! let req = client.get("https://example.com");
//! # drop(req);
//! # Ok(())
//! # }
//! ```
//!
//! If a token cannot be obtained, the request is not sent, and the
//! [`AuthenticationError`](crauth::AuthenticationError) is returned as a
//! middleware error.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use crauth::{Clock, ComputeResourceAuthenticator, System};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

/// A middleware that injects a compute resource access token into outgoing requests
#[derive(Clone, Debug)]
pub struct ComputeResourceMiddleware<C = System> {
    authenticator: ComputeResourceAuthenticator<C>,
}

impl<C> ComputeResourceMiddleware<C> {
    /// Construct a new middleware from an authenticator
    pub fn new(authenticator: ComputeResourceAuthenticator<C>) -> Self {
        Self { authenticator }
    }

    /// The authenticator used to obtain access tokens
    pub fn authenticator(&self) -> &ComputeResourceAuthenticator<C> {
        &self.authenticator
    }
}

#[async_trait::async_trait]
impl<C> Middleware for ComputeResourceMiddleware<C>
where
    C: Clock + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if req.headers().contains_key(header::AUTHORIZATION) {
            tracing::trace!("request already has authorization, leaving it in place");
        } else {
            self.authenticator
                .authenticate(&mut req)
                .await
                .map_err(reqwest_middleware::Error::middleware)?;
        }

        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    use crauth::ComputeResourceConfig;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;
    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;

    const TEST_TOKEN: &str = "this-is-a-test-token";
    const BEARER_TEST_TOKEN: &str = "Bearer this-is-a-test-token";

    struct AuthChecker {
        expected_authorization: String,
        checked: AtomicBool,
    }

    impl AuthChecker {
        pub fn new(expected: impl Into<String>) -> Self {
            Self {
                expected_authorization: expected.into(),
                checked: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Middleware for AuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let authorization_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .expect("no authorization header")
                .to_str()
                .expect("authorization header was not valid UTF-8");

            assert_eq!(authorization_header, self.expected_authorization);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    #[derive(Default)]
    struct NotReached {
        reached: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for NotReached {
        async fn handle(
            &self,
            _: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            self.reached.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    struct Fixture {
        server: Server,
        _token_file: NamedTempFile,
        middleware: ComputeResourceMiddleware,
    }

    fn prepare_middleware() -> Fixture {
        let server = Server::run();
        let mut token_file = NamedTempFile::new().unwrap();
        writeln!(token_file, "cr-token-1").unwrap();

        let config = ComputeResourceConfig::new()
            .with_identity_token_file(token_file.path())
            .with_profile_name("iam-user-123")
            .with_url(server.url("/").to_string());
        let authenticator = ComputeResourceAuthenticator::new(config).unwrap();

        Fixture {
            server,
            _token_file: token_file,
            middleware: ComputeResourceMiddleware::new(authenticator),
        }
    }

    fn expect_exchange(server: &Server) {
        server.expect(
            Expectation::matching(request::method_path("POST", "/identity/token")).respond_with(
                json_encoded(json!({
                    "access_token": TEST_TOKEN,
                    "token_type": "Bearer",
                    "expires_in": 3600,
                })),
            ),
        );
    }

    mod when_request_does_not_have_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_attaches_access_token() {
            let fixture = prepare_middleware();
            expect_exchange(&fixture.server);
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(fixture.middleware.clone())
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn middleware_reuses_cached_token() {
            let fixture = prepare_middleware();
            expect_exchange(&fixture.server);
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(fixture.middleware.clone())
                .with_arc(auth_checker.clone())
                .build();

            for _ in 0..3 {
                let resp = client.get("https://example.com").send().await.unwrap();
                assert_eq!(resp.status(), http::StatusCode::OK);
            }

            assert!(fixture.middleware.authenticator().token_data().is_some());
        }

        mod and_no_token_can_be_obtained {
            use super::*;

            #[tokio::test]
            async fn request_is_not_sent() {
                let fixture = prepare_middleware();
                fixture.server.expect(
                    Expectation::matching(request::method_path("POST", "/identity/token"))
                        .respond_with(status_code(400).body("Sorry, bad request!")),
                );
                let not_reached = Arc::new(NotReached::default());

                let client = ClientBuilder::new(Client::default())
                    .with(fixture.middleware.clone())
                    .with_arc(not_reached.clone())
                    .build();

                let err = client.get("https://example.com").send().await.unwrap_err();

                assert!(matches!(err, reqwest_middleware::Error::Middleware(_)));
                assert!(err.to_string().contains("Sorry, bad request!"));
                assert!(!not_reached.reached.load(Ordering::Acquire));
            }
        }
    }

    mod when_request_already_contains_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_does_not_attach_access_token() {
            const OVERRIDE_TOKEN: &str = "overridden!";
            // Reqwest uses a capital `B` bearer
            const BEARER_OVERRIDE_TOKEN: &str = "Bearer overridden!";

            // No exchange is expected, so a token request fails verification
            let fixture = prepare_middleware();
            let auth_checker = Arc::new(AuthChecker::new(BEARER_OVERRIDE_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(fixture.middleware.clone())
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get("https://example.com")
                .bearer_auth(OVERRIDE_TOKEN)
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
            assert!(fixture.middleware.authenticator().token_data().is_none());
        }
    }
}
