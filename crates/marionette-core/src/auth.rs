//! Identity sources consulted before serving the application view.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ManagerError;
use crate::model::User;

/// Cookie-based identity carried by an incoming page request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    cookies: Vec<(String, String)>,
}

impl RequestIdentity {
    /// Build from `(name, value)` cookie pairs in request order.
    pub fn from_cookies(cookies: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            cookies: cookies.into_iter().collect(),
        }
    }

    /// Value of the first cookie with the given name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// External authentication service.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Whether this is the no-op service that authorizes everyone.
    fn is_default(&self) -> bool;

    /// Validate a session token taken from the service's cookie.
    async fn is_authenticated(&self, token: &str) -> bool;

    /// Name of the cookie holding the session token.
    fn session_cookie_name(&self) -> &str;

    /// Where to send unauthenticated visitors.
    fn failure_redirect(&self) -> &str;
}

/// Supplies the active [`AuthService`], which may fail to come up.
pub trait AuthProvider: Send + Sync {
    /// The service to consult for this request.
    fn service(&self) -> Result<Arc<dyn AuthService>, ManagerError>;
}

/// Service that authorizes every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuthService;

#[async_trait]
impl AuthService for NoopAuthService {
    fn is_default(&self) -> bool {
        true
    }

    async fn is_authenticated(&self, _token: &str) -> bool {
        true
    }

    fn session_cookie_name(&self) -> &str {
        ""
    }

    fn failure_redirect(&self) -> &str {
        "/"
    }
}

/// Provider returning one fixed service.
#[derive(Clone)]
pub struct StaticAuthProvider {
    service: Arc<dyn AuthService>,
}

impl StaticAuthProvider {
    /// Always hand out `service`.
    pub fn new(service: Arc<dyn AuthService>) -> Self {
        Self { service }
    }
}

impl Default for StaticAuthProvider {
    fn default() -> Self {
        Self::new(Arc::new(NoopAuthService))
    }
}

impl AuthProvider for StaticAuthProvider {
    fn service(&self) -> Result<Arc<dyn AuthService>, ManagerError> {
        Ok(self.service.clone())
    }
}

/// A user already resolved by the local login source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalSession {
    /// The resolved user.
    pub user: User,
    /// The login framework's own authentication verdict.
    pub authenticated: bool,
}

/// The deployment's own login framework.
#[async_trait]
pub trait LocalLogin: Send + Sync {
    /// User resolved for this request, if the framework knows one.
    async fn resolve(&self, identity: &RequestIdentity) -> Option<LocalSession>;
}

/// Login source that never resolves a user.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLocalLogin;

#[async_trait]
impl LocalLogin for NoLocalLogin {
    async fn resolve(&self, _identity: &RequestIdentity) -> Option<LocalSession> {
        None
    }
}
