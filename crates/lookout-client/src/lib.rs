//! HTTP client for the Lookout backend.
//!
//! The backend authenticates with a session cookie issued by `POST /login`,
//! so a single [`HttpBackend`] keeps its own cookie jar and every call made
//! through it shares the session.

use std::time::Duration;

use async_trait::async_trait;
use lookout_types::{
    config::BackendConfig,
    images::{DetectionList, DetectionMap, ImageList, ImageRecord},
    instance::{Instance, InstanceAction, WireInstance},
    LookoutError, Result,
};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// Instance management surface used by the control panel.
#[async_trait]
pub trait InstanceApi: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<Instance>>;
    async fn create_instance(&self, instance: &Instance) -> Result<Instance>;
    async fn update_instance(&self, name: &str, instance: &Instance) -> Result<()>;
    async fn delete_instance(&self, name: &str) -> Result<()>;
    async fn perform_action(&self, name: &str, action: InstanceAction) -> Result<()>;
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireInstanceList {
    #[serde(default)]
    instances: Vec<WireInstance>,
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base = Url::parse(config.base_url.trim()).map_err(|err| {
            LookoutError::Configuration(format!(
                "invalid backend url '{}': {err}",
                config.base_url
            ))
        })?;
        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| client_error(format!("failed to build http client: {err}")))?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                LookoutError::Configuration(format!("backend url '{}' cannot be a base", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Resolve a backend-relative link such as `/frames/camera_gate.jpg`.
    pub fn resolve(&self, link: &str) -> Result<Url> {
        self.base
            .join(link)
            .map_err(|err| client_error(format!("invalid link '{link}': {err}")))
    }

    /// Start a session. On rejection the backend's `error` text is returned.
    pub async fn login(&self, password: &str) -> Result<()> {
        let url = self.endpoint(&["login"])?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "password": password }))
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::OK {
            debug!("login accepted");
            return Ok(());
        }
        let status = response.status().as_u16();
        let message = error_message(response)
            .await
            .unwrap_or_else(|| "Login failed".to_string());
        Err(LookoutError::Http { status, message })
    }

    pub async fn logout(&self) -> Result<()> {
        let url = self.endpoint(&["logout"])?;
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        // The backend answers logout with a redirect to the login page.
        if response.status().is_success() || response.status().is_redirection() {
            Ok(())
        } else {
            Err(status_error(response, "Logout failed").await)
        }
    }

    /// Probe whether the current session is accepted.
    pub async fn check_auth(&self) -> Result<bool> {
        let url = self.endpoint(&["api", "instances"])?;
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::UNAUTHORIZED => Ok(false),
            _ => Err(status_error(response, "Authentication check failed").await),
        }
    }

    pub async fn images(&self) -> Result<Vec<ImageRecord>> {
        let url = self.endpoint(&["api", "images"])?;
        let list: ImageList = self.get_json(url).await?;
        Ok(list.images)
    }

    pub async fn detections(&self) -> Result<DetectionMap> {
        let url = self.endpoint(&["api", "detections"])?;
        let list: DetectionList = self.get_json(url).await?;
        Ok(list.detections)
    }

    /// Download raw frame bytes for an image link.
    pub async fn fetch_frame(&self, link: &str) -> Result<Vec<u8>> {
        let url = self.resolve(link)?;
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let response = ensure_success(response, "Failed to fetch frame").await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let response = ensure_success(response, "Request failed").await?;
        response
            .json::<T>()
            .await
            .map_err(|err| LookoutError::Decode(err.to_string()))
    }
}

#[async_trait]
impl InstanceApi for HttpBackend {
    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let url = self.endpoint(&["api", "instances"])?;
        let list: WireInstanceList = self.get_json(url).await?;
        let mut instances = Vec::with_capacity(list.instances.len());
        for wire in list.instances {
            let name = wire.name.clone();
            match Instance::try_from(wire) {
                Ok(instance) => instances.push(instance),
                Err(err) => warn!("Skipping instance '{}': {err}", name),
            }
        }
        Ok(instances)
    }

    async fn create_instance(&self, instance: &Instance) -> Result<Instance> {
        instance.validate()?;
        let url = self.endpoint(&["api", "instances"])?;
        let response = self
            .client
            .post(url)
            .json(instance)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response, "Failed to create instance").await?;
        response
            .json::<Instance>()
            .await
            .map_err(|err| LookoutError::Decode(err.to_string()))
    }

    async fn update_instance(&self, name: &str, instance: &Instance) -> Result<()> {
        instance.validate()?;
        let url = self.endpoint(&["api", "instances", name])?;
        let response = self
            .client
            .put(url)
            .json(instance)
            .send()
            .await
            .map_err(transport_error)?;
        ensure_success(response, "Failed to update instance").await?;
        Ok(())
    }

    async fn delete_instance(&self, name: &str) -> Result<()> {
        let url = self.endpoint(&["api", "instances", name])?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(transport_error)?;
        ensure_success(response, "Error deleting instance").await?;
        Ok(())
    }

    async fn perform_action(&self, name: &str, action: InstanceAction) -> Result<()> {
        let url = self.endpoint(&["api", "instances", name, action.as_str()])?;
        let response = self.client.post(url).send().await.map_err(transport_error)?;
        let fallback = format!("Failed to {} instance", action.as_str());
        ensure_success(response, &fallback).await?;
        Ok(())
    }
}

async fn error_message(response: Response) -> Option<String> {
    let body = response.text().await.ok()?;
    serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|body| body.error)
        .filter(|message| !message.is_empty())
}

async fn status_error(response: Response, fallback: &str) -> LookoutError {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return LookoutError::Unauthorized;
    }
    let message = error_message(response)
        .await
        .unwrap_or_else(|| fallback.to_string());
    LookoutError::Http {
        status: status.as_u16(),
        message,
    }
}

async fn ensure_success(response: Response, fallback: &str) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(response, fallback).await)
    }
}

fn transport_error(err: reqwest::Error) -> LookoutError {
    LookoutError::Transport(err.to_string())
}

/// Generate an error aligned with client semantics.
pub fn client_error(message: impl Into<String>) -> LookoutError {
    LookoutError::Transport(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{header, HeaderMap, StatusCode as AxumStatus},
        response::{IntoResponse, Response as AxumResponse},
        routing::{get, post, put},
        Json, Router,
    };
    use serde_json::Value;

    fn authed(headers: &HeaderMap) -> bool {
        headers
            .get(header::COOKIE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|cookie| cookie.contains("session=ok"))
    }

    async fn login(Json(body): Json<Value>) -> AxumResponse {
        if body["password"] == "hello" {
            (
                [(header::SET_COOKIE, "session=ok; Path=/")],
                Json(json!({ "success": true })),
            )
                .into_response()
        } else {
            (
                AxumStatus::UNAUTHORIZED,
                Json(json!({ "error": "Invalid password" })),
            )
                .into_response()
        }
    }

    async fn instances(headers: HeaderMap) -> AxumResponse {
        if !authed(&headers) {
            return (AxumStatus::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" })))
                .into_response();
        }
        Json(json!({
            "instances": [
                { "name": "Spray Valley", "instance_type": "youtube",
                  "youtube_url": "https://youtu.be/abc", "frequency": 30, "status": "running" },
                { "name": "broken" },
                { "name": "big tree", "camera_url": "rtsp://tree", "camera_username": "u",
                  "camera_password": "p", "latitude": 38.5, "longitude": -121.4 }
            ]
        }))
        .into_response()
    }

    async fn action(Path((name, action)): Path<(String, String)>) -> AxumResponse {
        if name == "big tree" && action == "start" {
            return (
                AxumStatus::BAD_REQUEST,
                Json(json!({ "error": "Instance already running" })),
            )
                .into_response();
        }
        if name == "ghost" {
            return AxumStatus::NOT_FOUND.into_response();
        }
        Json(json!({ "success": true, "status": "running" })).into_response()
    }

    async fn update(Path(name): Path<String>, Json(body): Json<Value>) -> AxumResponse {
        if name == "big tree" && body["instance_type"] == "camera" {
            Json(json!({ "success": true })).into_response()
        } else {
            AxumStatus::BAD_REQUEST.into_response()
        }
    }

    async fn spawn_backend() -> BackendConfig {
        let app = Router::new()
            .route("/login", post(login))
            .route("/logout", get(|| async { Json(json!({ "success": true })) }))
            .route("/api/instances", get(instances))
            .route("/api/instances/:name", put(update))
            .route("/api/instances/:name/:action", post(action))
            .route(
                "/api/images",
                get(|| async {
                    Json(json!({ "images": [
                        { "source": "Big Tree", "instance": "big tree", "url": "/frames/camera_bigtree.jpg",
                          "timestamp": "2024-05-01 10:00:00", "modified_at": 17 }
                    ]}))
                }),
            )
            .route(
                "/api/detections",
                get(|| async {
                    Json(json!({ "detections": { "big tree": { "results": [
                        { "left": 726, "top": 345, "right": 862, "bottom": 413, "score": 0.86 }
                    ]}}}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        BackendConfig {
            base_url: format!("http://{addr}"),
            password: None,
            request_timeout_ms: 2_000,
        }
    }

    #[tokio::test]
    async fn session_cookie_unlocks_instance_list() {
        let backend = HttpBackend::new(&spawn_backend().await).expect("client");
        assert!(!backend.check_auth().await.expect("probe"));
        assert!(matches!(
            backend.list_instances().await,
            Err(LookoutError::Unauthorized)
        ));

        let rejected = backend.login("wrong").await.expect_err("bad password");
        assert_eq!(rejected.user_message(), "Invalid password");

        backend.login("hello").await.expect("login");
        assert!(backend.check_auth().await.expect("probe"));
        let instances = backend.list_instances().await.expect("list");
        let names: Vec<_> = instances.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Spray Valley", "big tree"]);
        backend.logout().await.expect("logout");
    }

    #[tokio::test]
    async fn action_failures_carry_backend_error() {
        let backend = HttpBackend::new(&spawn_backend().await).expect("client");
        let err = backend
            .perform_action("big tree", InstanceAction::Start)
            .await
            .expect_err("already running");
        assert_eq!(err.user_message(), "Instance already running");

        let err = backend
            .perform_action("ghost", InstanceAction::Stop)
            .await
            .expect_err("missing");
        assert_eq!(err.user_message(), "Failed to stop instance");

        backend
            .perform_action("Spray Valley", InstanceAction::Stop)
            .await
            .expect("stop");
    }

    #[tokio::test]
    async fn names_with_spaces_are_path_encoded() {
        let config = spawn_backend().await;
        let backend = HttpBackend::new(&config).expect("client");
        let url = backend
            .endpoint(&["api", "instances", "big tree"])
            .expect("endpoint");
        assert!(url.as_str().ends_with("/api/instances/big%20tree"));

        let instance = Instance {
            name: "big tree".into(),
            source: lookout_types::instance::InstanceSource::Camera {
                url: "rtsp://tree".into(),
                username: "u".into(),
                password: "p".into(),
                folder_path: "./camera_images".into(),
            },
            frequency: 60,
            lookout_endpoint: String::new(),
            latitude: 38.5,
            longitude: -121.4,
            status: Default::default(),
        };
        backend
            .update_instance("big tree", &instance)
            .await
            .expect("update");
    }

    #[tokio::test]
    async fn images_and_detections_decode() {
        let backend = HttpBackend::new(&spawn_backend().await).expect("client");
        let images = backend.images().await.expect("images");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].join_key(), Some("big tree"));
        let detections = backend.detections().await.expect("detections");
        assert_eq!(detections["big tree"].results.len(), 1);
        assert_eq!(
            backend
                .resolve(&images[0].url)
                .expect("resolve")
                .path(),
            "/frames/camera_bigtree.jpg"
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let config = BackendConfig {
            base_url: "not a url".into(),
            password: None,
            request_timeout_ms: 1_000,
        };
        assert!(matches!(
            HttpBackend::new(&config),
            Err(LookoutError::Configuration(_))
        ));
    }
}
