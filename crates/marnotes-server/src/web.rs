//! Web UI host.
//!
//! Serves the prebuilt single-page application from `{web_dir}/public`:
//! `/static/*` maps to files in that directory, and every other path renders
//! `index.html` with the document-service port substituted in, so the
//! browser knows where to fetch documents from.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::response::Html;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Placeholder in `index.html` replaced with the document-service port.
pub const PORT_PLACEHOLDER: &str = "{{.JSONPort}}";

/// Errors from preparing the web UI.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// The HTML shell could not be read.
    #[error("failed to load web app template '{}': {source}", path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The rendered HTML shell plus the directory its assets come from.
#[derive(Debug, Clone)]
pub struct WebShell {
    public_dir: PathBuf,
    page: Arc<str>,
}

impl WebShell {
    /// Load `{web_dir}/public/index.html` and render it for `document_port`.
    ///
    /// # Errors
    ///
    /// Returns [`WebError::Template`] if the shell cannot be read.
    pub async fn load(web_dir: &Path, document_port: u16) -> Result<Self, WebError> {
        let public_dir = web_dir.join("public");
        let template_path = public_dir.join("index.html");
        let template = tokio::fs::read_to_string(&template_path)
            .await
            .map_err(|source| WebError::Template {
                path: template_path,
                source,
            })?;

        Ok(Self {
            public_dir,
            page: render(&template, document_port).into(),
        })
    }

    /// Build the web UI router.
    pub fn router(self) -> Router {
        let assets = ServeDir::new(&self.public_dir);
        Router::new()
            .nest_service("/static", assets)
            .fallback(index)
            .layer(TraceLayer::new_for_http())
            .with_state(self.page)
    }
}

fn render(template: &str, document_port: u16) -> String {
    template.replace(PORT_PLACEHOLDER, &document_port.to_string())
}

async fn index(State(page): State<Arc<str>>) -> Html<String> {
    Html(page.to_string())
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use super::*;

    fn web_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        std::fs::create_dir_all(&public).unwrap();
        std::fs::write(
            public.join("index.html"),
            "<script>window.__JSON_SERVER_PORT__ = \"{{.JSONPort}}\";</script>",
        )
        .unwrap();
        std::fs::write(public.join("app.js"), "console.log('hi');").unwrap();
        dir
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_owned())
            .unwrap_or_default();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn render_substitutes_every_placeholder() {
        assert_eq!(render("{{.JSONPort}}/{{.JSONPort}}", 8081), "8081/8081");
        assert_eq!(render("no placeholder", 8081), "no placeholder");
    }

    #[tokio::test]
    async fn index_is_rendered_with_document_port() {
        let dir = web_dir();
        let shell = WebShell::load(dir.path(), 8123).await.unwrap();

        let (status, content_type, body) = get(shell.clone().router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/html"));
        assert!(body.contains("\"8123\""));
        assert!(!body.contains(PORT_PLACEHOLDER));

        let (status, _, deep) = get(shell.router(), "/some/client/route").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deep, body);
    }

    #[tokio::test]
    async fn static_assets_are_served() {
        let dir = web_dir();
        let shell = WebShell::load(dir.path(), 8080).await.unwrap();

        let (status, _, body) = get(shell.clone().router(), "/static/app.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "console.log('hi');");

        let (status, _, _) = get(shell.router(), "/static/missing.js").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_template_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = WebShell::load(dir.path(), 8080).await.unwrap_err();
        assert!(matches!(err, WebError::Template { .. }));
    }
}
