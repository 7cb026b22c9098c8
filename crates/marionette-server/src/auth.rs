//! Auth services backed by settings: the no-op default or a token endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use marionette_core::{AuthProvider, AuthService, ManagerError, NoopAuthService};
use marionette_settings::{AuthMode, AuthSettings};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

#[derive(Deserialize)]
struct TokenVerdict {
    #[serde(default)]
    authenticated: bool,
}

/// Validates session tokens against a remote endpoint.
///
/// `GET <endpoint>?token=<value>` must answer 2xx with
/// `{"authenticated": true}`. Anything else, transport failures included,
/// counts as not authenticated.
#[derive(Clone, Debug)]
pub struct RemoteAuthService {
    client: reqwest::Client,
    endpoint: Url,
    cookie_name: String,
    failure_redirect: String,
}

impl RemoteAuthService {
    /// Service querying `endpoint`, reading tokens from `cookie_name`.
    pub fn new(
        endpoint: Url,
        cookie_name: impl Into<String>,
        failure_redirect: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint,
            cookie_name: cookie_name.into(),
            failure_redirect: failure_redirect.into(),
        }
    }

    async fn verdict(&self, token: &str) -> Result<bool, reqwest::Error> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("token", token)])
            .send()
            .await?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "token rejected");
            return Ok(false);
        }
        Ok(response.json::<TokenVerdict>().await?.authenticated)
    }
}

#[async_trait]
impl AuthService for RemoteAuthService {
    fn is_default(&self) -> bool {
        false
    }

    async fn is_authenticated(&self, token: &str) -> bool {
        match self.verdict(token).await {
            Ok(authenticated) => authenticated,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "token endpoint unreachable");
                false
            }
        }
    }

    fn session_cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn failure_redirect(&self) -> &str {
        &self.failure_redirect
    }
}

/// Provider selected by [`AuthSettings::mode`].
///
/// A `token` mode without a usable endpoint is kept as an error and
/// reported on every [`AuthProvider::service`] call.
pub struct SettingsAuthProvider {
    service: Result<Arc<dyn AuthService>, String>,
}

impl SettingsAuthProvider {
    /// Build the provider for `settings`.
    pub fn new(settings: &AuthSettings) -> Self {
        let service = match settings.mode {
            AuthMode::None => Ok(Arc::new(NoopAuthService) as Arc<dyn AuthService>),
            AuthMode::Token => Self::remote(settings),
        };
        Self { service }
    }

    fn remote(settings: &AuthSettings) -> Result<Arc<dyn AuthService>, String> {
        let raw = settings
            .token_endpoint
            .as_deref()
            .ok_or_else(|| "token auth requires auth.tokenEndpoint".to_owned())?;
        let endpoint =
            Url::parse(raw).map_err(|e| format!("invalid token endpoint '{raw}': {e}"))?;
        Ok(Arc::new(RemoteAuthService::new(
            endpoint,
            settings.cookie_name.clone(),
            settings.failure_redirect.clone(),
        )))
    }
}

impl std::fmt::Debug for SettingsAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsAuthProvider")
            .field("available", &self.service.is_ok())
            .finish()
    }
}

impl AuthProvider for SettingsAuthProvider {
    fn service(&self) -> Result<Arc<dyn AuthService>, ManagerError> {
        self.service.clone().map_err(ManagerError::initialization)
    }
}
