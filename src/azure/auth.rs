use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::RemoteError;

/// Refresh this long before the token actually expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub enum Credentials {
    /// Pre-issued bearer token (`AZURE_ACCESS_TOKEN`).
    Static(String),
    /// Service principal used with the OAuth2 client-credentials flow.
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Credentials::Static(..)"),
            Self::ClientSecret { tenant_id, client_id, .. } => f
                .debug_struct("Credentials::ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    /// Pick credentials from the usual Azure environment variables.
    pub fn from_env() -> Option<Self> {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());

        if let Some(token) = var("AZURE_ACCESS_TOKEN") {
            return Some(Self::Static(token));
        }
        Some(Self::ClientSecret {
            tenant_id: var("AZURE_TENANT_ID")?,
            client_id: var("AZURE_CLIENT_ID")?,
            client_secret: var("AZURE_CLIENT_SECRET")?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3_600
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Hands out bearer tokens for the management API, caching the
/// client-credentials token until shortly before it expires.
pub struct TokenProvider {
    http: reqwest::Client,
    authority: String,
    scope: String,
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, authority: &str, management_endpoint: &str, credentials: Credentials) -> Self {
        Self {
            http,
            authority: authority.trim_end_matches('/').to_string(),
            scope: format!("{}/.default", management_endpoint.trim_end_matches('/')),
            credentials,
            cached: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> Result<String, RemoteError> {
        let (tenant_id, client_id, client_secret) = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => (tenant_id, client_id, client_secret),
        };

        // Held across the refresh so concurrent callers wait for one request.
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, tenant_id);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RemoteError::Auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Auth(format!(
                "token endpoint returned {status}: {}",
                truncate(&body, 256)
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Auth(format!("invalid token response: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        tracing::debug!(expires_in = token.expires_in, "acquired management API token");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

pub(crate) fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_as_is() {
        let provider = TokenProvider::new(
            reqwest::Client::new(),
            "https://login.example",
            "https://management.example/",
            Credentials::Static("abc".into()),
        );
        assert_eq!(provider.token().await.unwrap(), "abc");
        assert_eq!(provider.scope, "https://management.example/.default");
    }

    fn client_secret() -> Credentials {
        Credentials::ClientSecret {
            tenant_id: "tenant".into(),
            client_id: "app".into(),
            client_secret: "s3cret".into(),
        }
    }

    #[tokio::test]
    async fn client_credentials_token_is_cached() {
        use wiremock::matchers::{body_string_contains, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = TokenProvider::new(
            reqwest::Client::new(),
            &server.uri(),
            "https://management.example",
            client_secret(),
        );
        assert_eq!(provider.token().await.unwrap(), "fresh");
        assert_eq!(provider.token().await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn rejected_token_request_is_an_auth_error() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let provider = TokenProvider::new(
            reqwest::Client::new(),
            &server.uri(),
            "https://management.example",
            client_secret(),
        );
        match provider.token().await {
            Err(RemoteError::Auth(msg)) => assert!(msg.contains("invalid_client")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = Credentials::ClientSecret {
            tenant_id: "t".into(),
            client_id: "c".into(),
            client_secret: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
        assert!(!format!("{:?}", Credentials::Static("tok".into())).contains("tok"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
