#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use checkup_core::cache::UpdateCache;
use checkup_core::logwatch::{LogWatcher, PacmanLogParser};
use checkup_core::models::{CoreError, CoreErrorKind, SourceDescriptor, SourceId, Update};
use checkup_core::persistence::JsonFileStore;
use checkup_core::sources::{SourceResult, UpdateSource};
use checkup_daemon::http::{self, AppState, WsSettings};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DESCRIPTOR: SourceDescriptor = SourceDescriptor {
    id: SourceId::Pacman,
    display_name: "switchable",
    repo_tag: Some("pacman"),
};

/// Reports whatever the test last told it to.
pub struct SwitchableSource {
    result: Mutex<SourceResult<Vec<Update>>>,
}

impl SwitchableSource {
    pub fn new(updates: Vec<Update>) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Ok(updates)),
        })
    }

    pub fn set(&self, updates: Vec<Update>) {
        *self.result.lock().unwrap() = Ok(updates);
    }

    pub fn fail(&self) {
        *self.result.lock().unwrap() = Err(CoreError::for_source(
            SourceId::Pacman,
            CoreErrorKind::ProcessFailure,
            "checkupdates exited with status 1",
        ));
    }
}

impl UpdateSource for SwitchableSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &DESCRIPTOR
    }

    fn list_pending(&self) -> SourceResult<Vec<Update>> {
        self.result.lock().unwrap().clone()
    }
}

pub fn updates(names: &[&str]) -> Vec<Update> {
    names
        .iter()
        .map(|name| Update::new(*name, "2.0-1").old_version("1.0-1"))
        .collect()
}

pub struct TestServer {
    pub address: SocketAddr,
    pub state: Arc<AppState>,
    pub source: Arc<SwitchableSource>,
    pub cache_path: PathBuf,
    pub log_path: PathBuf,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    _dir: TempDir,
}

pub struct ServerOptions {
    pub ws: WsSettings,
    pub watch_log: bool,
    pub initial: Vec<Update>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            ws: WsSettings::default(),
            watch_log: false,
            initial: updates(&["bash", "linux"]),
        }
    }
}

impl TestServer {
    pub async fn start(options: ServerOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("checkup.json");
        let log_path = dir.path().join("pacman.log");
        std::fs::write(&log_path, "").unwrap();

        let source = SwitchableSource::new(options.initial);
        let cache = Arc::new(UpdateCache::new(
            vec![Arc::clone(&source) as Arc<dyn UpdateSource>],
            Arc::new(JsonFileStore::new(&cache_path)),
        ));

        let shutdown = CancellationToken::new();
        let mut state = AppState::new(Arc::clone(&cache), shutdown.clone()).with_ws_settings(options.ws);
        if options.watch_log {
            state = state.with_watcher(Arc::new(LogWatcher::new(
                &log_path,
                Arc::new(PacmanLogParser),
                Arc::clone(&cache),
            )));
        }
        let state = Arc::new(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(http::serve(listener, Arc::clone(&state)));

        Self {
            address,
            state,
            source,
            cache_path,
            log_path,
            shutdown,
            server,
            _dir: dir,
        }
    }

    pub fn cache(&self) -> &Arc<UpdateCache> {
        &self.state.cache
    }

    pub fn url(&self, scheme: &str, path: &str) -> String {
        format!("{scheme}://{}{path}", self.address)
    }

    /// Issues a blocking request off the runtime and returns status, `Allow`
    /// header and decoded body.
    pub async fn request(
        &self,
        method: &'static str,
        path: &str,
    ) -> (u16, Option<String>, serde_json::Value) {
        let url = self.url("http", path);
        tokio::task::spawn_blocking(move || {
            let response = match ureq::request(method, &url).call() {
                Ok(response) => response,
                Err(ureq::Error::Status(_, response)) => response,
                Err(error) => panic!("request to {url} failed: {error}"),
            };
            let status = response.status();
            let allow = response.header("Allow").map(str::to_owned);
            let body = response.into_string().unwrap();
            (status, allow, serde_json::from_str(&body).unwrap())
        })
        .await
        .unwrap()
    }

    pub async fn get(&self, path: &str) -> (u16, serde_json::Value) {
        let (status, _, body) = self.request("GET", path).await;
        (status, body)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.server.await.unwrap();
        self.state.tracker.close();
        tokio::time::timeout(std::time::Duration::from_secs(5), self.state.tracker.wait())
            .await
            .expect("tracked tasks finish after shutdown");
    }
}
