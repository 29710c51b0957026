//! Test Helper Utilities
//!
//! Builds a server whose plugins are one POSIX shell script:
//! - `load <path>` prints the file (sources hold project JSON). Paths
//!   containing `broken` fail, paths containing `noisy` warn.
//! - `dump <path>` writes the `{project, options}` envelope to `path`
//! - `process` strips the envelope and warns "pitch smoothed"

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use svbatch_core::EngineConfig;
use svbatch_server::config::CommandPluginConfig;
use svbatch_server::{build_router, AppState, ServerConfig};
use tempfile::TempDir;
use tower::ServiceExt;

const PLUGIN_SCRIPT: &str = r#"
verb="$1"
path="$2"
case "$verb" in
  load)
    case "$path" in
      *broken*) echo "unexpected token in $path" >&2; exit 2 ;;
    esac
    case "$path" in
      *noisy*) echo "warning: tempo map guessed" >&2 ;;
    esac
    cat "$path"
    ;;
  dump)
    cat > "$path"
    ;;
  process)
    echo "warning: pitch smoothed" >&2
    sed 's/^{"project":\(.*\),"options":.*}$/\1/'
    ;;
  *)
    echo "unknown verb $verb" >&2
    exit 64
    ;;
esac
"#;

pub struct TestServer {
    pub app: Router,
    pub state: AppState,
    pub dir: TempDir,
}

impl TestServer {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("plugin.sh");
        fs::write(&script, PLUGIN_SCRIPT).unwrap();
        fs::create_dir_all(dir.path().join("in")).unwrap();

        let state = AppState::from_config(&test_config(&script)).unwrap();
        let app = build_router(state.clone());
        Self { app, state, dir }
    }

    /// Write a source project with the given track names
    pub fn source(&self, name: &str, tracks: &[&str]) -> PathBuf {
        let path = self.dir.path().join("in").join(name);
        fs::write(&path, serde_json::json!({ "tracks": tracks }).to_string()).unwrap();
        path
    }

    pub fn out_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> Response<Body> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Send a request and parse the JSON response body
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = self.request(method, uri, body).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

fn test_config(script: &Path) -> ServerConfig {
    let plugin = |suffix: &str| CommandPluginConfig {
        program: "sh".to_string(),
        args: vec![script.display().to_string()],
        suffix: Some(suffix.to_string()),
        ..Default::default()
    };

    let mut config = ServerConfig {
        engine: EngineConfig::default()
            .with_max_workers(2)
            .with_unit_timeout(Some(std::time::Duration::from_secs(10))),
        ..Default::default()
    };
    config.formats.insert("json".to_string(), plugin("json"));
    config.formats.insert("svp".to_string(), plugin("svp"));
    config.middlewares.insert(
        "identity".to_string(),
        CommandPluginConfig {
            name: Some("Identity".to_string()),
            ..plugin("")
        },
    );
    config
}

/// Parse `event:` / `data:` pairs out of an SSE body
pub fn sse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut event = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_string());
                } else if let Some(payload) = line.strip_prefix("data:") {
                    data = serde_json::from_str(payload.trim()).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}

/// Tracks written by the `dump` verb
pub fn dumped_tracks(path: &Path) -> Vec<String> {
    let envelope: Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
    envelope["project"]["tracks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap().to_string())
        .collect()
}
