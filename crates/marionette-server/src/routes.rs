//! Page routes: dashboard, the authorized application view, test suites.

use std::io::ErrorKind;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum_extra::extract::CookieJar;
use marionette_core::{AuthProvider, LocalLogin, NoLocalLogin, RequestIdentity};
use marionette_settings::ViewSettings;
use tracing::{debug, error, instrument, warn};

/// Outcome of the application-view auth check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Access {
    /// Serve the view.
    Granted,
    /// Send the visitor elsewhere.
    Denied {
        /// Redirect target.
        redirect: String,
    },
}

/// View files and the identity sources guarding them.
pub struct Pages {
    views: ViewSettings,
    auth: Arc<dyn AuthProvider>,
    login: Arc<dyn LocalLogin>,
    fallback_redirect: String,
}

impl std::fmt::Debug for Pages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pages")
            .field("views", &self.views)
            .field("fallback_redirect", &self.fallback_redirect)
            .finish_non_exhaustive()
    }
}

impl Pages {
    /// Pages served from `views`; `fallback_redirect` is used when no auth
    /// service can be obtained.
    pub fn new(
        views: ViewSettings,
        auth: Arc<dyn AuthProvider>,
        fallback_redirect: impl Into<String>,
    ) -> Self {
        Self {
            views,
            auth,
            login: Arc::new(NoLocalLogin),
            fallback_redirect: fallback_redirect.into(),
        }
    }

    /// Consult `login` before falling back to session cookies.
    #[must_use]
    pub fn with_login(mut self, login: Arc<dyn LocalLogin>) -> Self {
        self.login = login;
        self
    }

    /// Decide whether `identity` may see the application view.
    ///
    /// The no-op service admits everyone. Otherwise a user already known to
    /// the local login source decides by its own verdict, and failing that
    /// the first cookie named after the service's session cookie is checked
    /// against the service.
    pub async fn authorize(&self, identity: &RequestIdentity) -> Access {
        let service = match self.auth.service() {
            Ok(service) => service,
            Err(e) => {
                error!(error = %e, "cannot obtain an authentication service");
                return Access::Denied {
                    redirect: self.fallback_redirect.clone(),
                };
            }
        };

        let authenticated = if service.is_default() {
            true
        } else if let Some(local) = self.login.resolve(identity).await {
            debug!(login = %local.user.login, "user resolved by local login");
            local.authenticated
        } else if let Some(token) = identity.cookie(service.session_cookie_name()) {
            service.is_authenticated(token).await
        } else {
            false
        };

        if authenticated {
            Access::Granted
        } else {
            Access::Denied {
                redirect: service.failure_redirect().to_owned(),
            }
        }
    }

    async fn render(&self, view: &str) -> Response {
        let path = self.views.dir.join(format!("{view}.html"));
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => Html(html).into_response(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(view, path = %path.display(), "view not found");
                StatusCode::NOT_FOUND.into_response()
            }
            Err(e) => {
                error!(view, path = %path.display(), error = %e, "cannot read view");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Router for `/`, `/app`, and `/tests/{suite}`.
pub fn router(pages: Arc<Pages>) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/app", get(application))
        .route("/tests/{suite}", get(test_suite))
        .with_state(pages)
}

/// GET /
async fn dashboard(State(pages): State<Arc<Pages>>) -> Response {
    pages.render(&pages.views.dashboard).await
}

/// GET /app
#[instrument(skip_all)]
async fn application(State(pages): State<Arc<Pages>>, jar: CookieJar) -> Response {
    let identity = RequestIdentity::from_cookies(
        jar.iter()
            .map(|c| (c.name().to_owned(), c.value().to_owned())),
    );
    match pages.authorize(&identity).await {
        Access::Granted => pages.render(&pages.views.app).await,
        Access::Denied { redirect } => {
            debug!(redirect, "application view denied");
            Redirect::to(&redirect).into_response()
        }
    }
}

/// GET /tests/{suite}
async fn test_suite(State(pages): State<Arc<Pages>>, Path(suite): Path<String>) -> Response {
    if !pages.views.test_suites.contains(&suite) {
        return StatusCode::NOT_FOUND.into_response();
    }
    pages.render(&format!("tests/{suite}")).await
}
