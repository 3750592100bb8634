#![forbid(unsafe_code)]

//! Axum backend that downloads videos on request and lists what is on disk.
//!
//! A submission is handled start to finish inside one request: probe the URL
//! with yt-dlp, download into a fresh directory, record the result in the JSON
//! catalog and answer with the new record. yt-dlp always runs on the blocking
//! pool so slow downloads never stall the other routes.

use std::{
    ffi::OsString,
    fs,
    io::SeekFrom,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Form, Json, Router,
    body::Body,
    extract::{Path as AxumPath, State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use clap::Parser;
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    signal,
    sync::Semaphore,
    task,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tubegrab::{
    config::{RuntimeOverrides, RuntimeSettings, VIDEOS_SUBDIR, resolve_runtime_settings},
    error::DownloadError,
    extractor::YtDlp,
    metadata::{MetadataStore, VideoCatalog, VideoRecord},
    page::render_index,
    security::ensure_not_root,
};
use uuid::Uuid;

/// URL prefix under which the static root is exposed.
const STATIC_PREFIX: &str = "/static";

#[derive(Debug, Parser)]
#[command(
    name = "backend",
    version,
    about = "Web front-end that downloads videos with yt-dlp"
)]
struct BackendArgs {
    /// Directory served under /static; downloads go to <static-root>/videos.
    #[arg(long)]
    static_root: Option<PathBuf>,
    /// JSON catalog of finished downloads.
    #[arg(long)]
    metadata_file: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    host: Option<IpAddr>,
    /// Outbound proxy for yt-dlp; "none" disables a proxy set in the env file.
    #[arg(long)]
    proxy: Option<String>,
    #[arg(long)]
    ytdlp_bin: Option<PathBuf>,
    /// Upper bound on downloads running at the same time.
    #[arg(long)]
    max_downloads: Option<usize>,
    /// Forward --verbose to yt-dlp downloads.
    #[arg(long)]
    verbose_engine: bool,
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_settings(self) -> Result<RuntimeSettings> {
        resolve_runtime_settings(RuntimeOverrides {
            static_root: self.static_root,
            metadata_file: self.metadata_file,
            tubegrab_port: self.port,
            tubegrab_host: self.host.map(|host| host.to_string()),
            proxy: self.proxy,
            ytdlp_bin: self.ytdlp_bin,
            max_concurrent_downloads: self.max_downloads,
            verbose_engine: self.verbose_engine.then_some(true),
            env_path: self.env_file,
        })
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBEGRAB_HOST")
}

/// Shared state injected into every Axum handler.
///
/// * `store` is the JSON catalog; all access goes through `spawn_blocking`.
/// * `engine` wraps yt-dlp with the configured proxy.
/// * `download_slots` bounds how many yt-dlp downloads run at once.
#[derive(Clone)]
struct AppState {
    store: Arc<MetadataStore>,
    engine: Arc<YtDlp>,
    files: Arc<FilePaths>,
    download_slots: Arc<Semaphore>,
}

impl AppState {
    fn new(settings: &RuntimeSettings, engine: YtDlp) -> Self {
        Self {
            store: Arc::new(MetadataStore::new(&settings.metadata_file)),
            engine: Arc::new(engine),
            files: Arc::new(FilePaths::new(&settings.static_root)),
            download_slots: Arc::new(Semaphore::new(settings.max_concurrent_downloads)),
        }
    }
}

/// Materialized file-system locations used at runtime.
struct FilePaths {
    static_root: PathBuf,
    videos: PathBuf,
}

impl FilePaths {
    fn new(static_root: &Path) -> Self {
        Self {
            static_root: static_root.to_path_buf(),
            videos: static_root.join(VIDEOS_SUBDIR),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct DownloadForm {
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = BackendArgs::parse().into_settings()?;
    ensure_not_root("backend")?;
    prepare_directories(&settings)?;

    let engine = YtDlp::new(settings.engine_config());
    match engine.version() {
        Ok(version) => info!(%version, "found yt-dlp"),
        Err(err) => warn!("yt-dlp is not usable, downloads will fail: {err:#}"),
    }
    if let Some(proxy) = &engine.config().proxy {
        info!(%proxy, "routing yt-dlp through proxy");
    }

    let state = AppState::new(&settings, engine);
    let app = router(state);

    let host = parse_host_arg(&settings.tubegrab_host)?;
    let addr = SocketAddr::new(host, settings.tubegrab_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        max_downloads = settings.max_concurrent_downloads,
        "tubegrab listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/download", post(download_video))
        .route("/videos", get(list_videos))
        .route("/static/{*path}", get(serve_static))
        .fallback(not_found)
        .with_state(state)
}

/// Creates the static root, the videos directory and the catalog's parent so
/// the first request does not have to.
fn prepare_directories(settings: &RuntimeSettings) -> Result<()> {
    let videos_root = settings.videos_root();
    fs::create_dir_all(&videos_root)
        .with_context(|| format!("creating {}", videos_root.display()))?;
    if let Some(parent) = settings.metadata_file.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still stops the process.
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn home(State(state): State<AppState>) -> ApiResult<Html<String>> {
    let catalog = state.load_catalog().await?;
    Ok(Html(render_index(&catalog)))
}

async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<VideoCatalog>> {
    let catalog = state.load_catalog().await?;
    Ok(Json(catalog))
}

async fn download_video(
    State(state): State<AppState>,
    form: Result<Form<DownloadForm>, FormRejection>,
) -> ApiResult<Json<VideoRecord>> {
    let url = match form {
        Ok(Form(form)) => form.url,
        Err(rejection) => {
            debug!("unreadable download form: {rejection}");
            None
        }
    };
    let url = url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());

    let result = match url {
        Some(url) => {
            info!(%url, "download requested");
            state.download(url).await
        }
        None => Err(DownloadError::MissingParameter),
    };

    match result {
        Ok(record) => Ok(Json(record)),
        Err(err) => {
            error!("download request failed: {err}");
            Err(err.into())
        }
    }
}

async fn serve_static(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let target = resolve_static_path(&state.files.static_root, &path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_file() => stream_file(target, &headers).await,
        _ => Err(ApiError::not_found("file not found")),
    }
}

impl AppState {
    async fn load_catalog(&self) -> ApiResult<VideoCatalog> {
        let store = self.store.clone();
        task::spawn_blocking(move || store.load())
            .await
            .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
            .map_err(|err| {
                error!("{err}");
                ApiError::internal(err.to_string())
            })
    }

    /// Runs one submission through probe, allocate, fetch, harvest and
    /// persist. Nothing is rolled back on failure: a failed fetch leaves its
    /// directory behind, but no record is ever written for it.
    async fn download(&self, url: String) -> Result<VideoRecord, DownloadError> {
        let engine = self.engine.clone();
        let probe_url = url.clone();
        let metadata = run_blocking(move || engine.probe(&probe_url)).await?;
        info!(title = %metadata.title, uploader = %metadata.uploader, "video info");

        let id = Uuid::new_v4().to_string();
        let output_dir = self.files.videos.join(&id);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|err| DownloadError::filesystem("creating", &output_dir, err))?;

        {
            let _slot = self
                .download_slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|err| DownloadError::DownloadFailed(err.to_string()))?;
            let engine = self.engine.clone();
            let fetch_dir = output_dir.clone();
            run_blocking(move || engine.fetch(&url, &fetch_dir)).await?;
        }

        let file_name = harvest_download(&output_dir).await?;
        let local_path = output_dir.join(&file_name);
        let filesize = tokio::fs::metadata(&local_path)
            .await
            .map_err(|err| DownloadError::filesystem("reading size of", &local_path, err))?
            .len();
        info!(path = %local_path.display(), filesize, "download completed");

        let record = VideoRecord {
            id: id.clone(),
            title: metadata.title,
            duration: metadata.duration,
            uploader: metadata.uploader,
            description: metadata.description,
            file_path: format!(
                "{STATIC_PREFIX}/{VIDEOS_SUBDIR}/{id}/{}",
                file_name.to_string_lossy()
            ),
            download_date: Utc::now().to_rfc3339(),
            filesize,
        };

        let store = self.store.clone();
        let stored = record.clone();
        run_blocking(move || store.insert(stored).map_err(DownloadError::from)).await?;
        info!(%id, "video recorded");
        Ok(record)
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, DownloadError>
where
    F: FnOnce() -> Result<T, DownloadError> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|err| DownloadError::Worker(err.to_string()))?
}

/// Picks the file yt-dlp produced in `dir`.
///
/// Only one file is recorded per submission. When yt-dlp leaves several
/// (for example unmerged audio and video streams) the first name in sorted
/// order wins and the rest stay on disk unreferenced.
async fn harvest_download(dir: &Path) -> Result<OsString, DownloadError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| DownloadError::filesystem("listing", dir, err))?;
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| DownloadError::filesystem("listing", dir, err))?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|kind| kind.is_file())
            .unwrap_or(false);
        if is_file {
            names.push(entry.file_name());
        }
    }
    names.sort();

    let mut names = names.into_iter();
    let first = names.next().ok_or(DownloadError::NoFileProduced)?;
    let orphaned: Vec<_> = names.collect();
    if !orphaned.is_empty() {
        warn!(
            kept = ?first,
            ?orphaned,
            "yt-dlp produced several files; only the first is recorded"
        );
    }
    Ok(first)
}

/// Maps a request path below `/static/` onto the static root, refusing
/// anything that is not a plain relative path.
fn resolve_static_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(ApiError::not_found("file not found"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Streams a static file, honoring a single `Range: bytes=` request.
async fn stream_file(path: PathBuf, headers: &HeaderMap) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?
        .len();
    let range = headers
        .get(header::RANGE)
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_RANGE, header_value(format!("bytes */{size}"))?);
            response
        }
        Some((start, end)) => {
            let end = end.min(size - 1);
            let length = end - start + 1;
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|err| ApiError::internal(format!("seeking {}: {err}", path.display())))?;
            let mut response = (
                StatusCode::PARTIAL_CONTENT,
                Body::from_stream(ReaderStream::new(file.take(length))),
            )
                .into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes {start}-{end}/{size}"))?,
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => {
            let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            response
        }
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn header_value(value: String) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(&value).map_err(|err| ApiError::internal(err.to_string()))
}

/// Reads a single `bytes=` range as an inclusive `(start, end)` pair.
///
/// A start beyond the file is returned as is so the caller can answer 416;
/// anything malformed yields `None` and the whole file is served.
fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let spec = value.to_str().ok()?.trim().strip_prefix("bytes=")?;
    let (first, last) = spec.trim().split_once('-')?;
    let last_byte = size.saturating_sub(1);
    match (first.trim(), last.trim()) {
        ("", "") => None,
        // "-N" asks for the final N bytes.
        ("", suffix) => {
            let suffix: u64 = suffix.parse().ok()?;
            (suffix > 0).then(|| (size.saturating_sub(suffix), last_byte))
        }
        (start, "") => Some((start.parse().ok()?, last_byte)),
        (start, end) => {
            let start: u64 = start.parse().ok()?;
            let end: u64 = end.parse().ok()?;
            (end >= start).then_some((start, end))
        }
    }
}
