//! itch-bridge entrypoint.
//!
//! A long-lived local process that answers a host launcher's requests about
//! the itch library: who is logged in, which games are owned and installed,
//! how long each has been played. The host drives refreshes by sending
//! `tick`; each request arrives as one JSON line on a Unix socket and gets one
//! JSON line back.

use fs_err as fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use itch_bridge_protocol::{
    parse_game_params, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use itch_core::{
    BridgeEngine, ButlerDb, ItchError, JsonFileStore, StorageConfig, SystemClock, SystemLauncher,
};
use serde::Serialize;

mod config;
mod logging;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    let storage = StorageConfig::from_home();
    let _logging_guard = logging::init(storage.as_ref().ok().map(|s| s.logs_dir()).as_deref());

    let storage = match storage {
        Ok(storage) => storage,
        Err(err) => {
            error!(error = %err, "Failed to resolve bridge storage paths");
            std::process::exit(1);
        }
    };

    let config = match config::load_runtime_config(&storage.config_file()) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load bridge config; using defaults");
            config::BridgeConfig::default()
        }
    };
    let storage = match &config.store.butler_db_path {
        Some(path) => storage.with_butler_db(path.clone()),
        None => storage,
    };

    let socket_path = storage.socket_file();
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare bridge socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    // A corrupt cache must not be replaced by an empty one: refuse to start.
    let store = match JsonFileStore::open(storage.persistent_cache_file()) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to open persistent cache");
            std::process::exit(1);
        }
    };

    let settings = config.engine_settings();
    info!(
        butler_db = %storage.butler_db().display(),
        ownership_interval_secs = settings.intervals.ownership_secs,
        installation_interval_secs = settings.intervals.installation_secs,
        staleness = ?settings.staleness,
        "Bridge config loaded"
    );

    let engine = Arc::new(BridgeEngine::new(
        Arc::new(ButlerDb::new(storage.butler_db().to_path_buf())),
        Arc::new(store),
        Arc::new(SystemLauncher),
        Arc::new(SystemClock),
        settings,
    ));

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind bridge socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "itch bridge started");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let engine = Arc::clone(&engine);
                thread::spawn(move || handle_connection(stream, engine));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept bridge connection");
            }
        }
    }
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, engine: Arc<BridgeEngine>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Bridge request received");
    let response = handle_request(request, &engine);
    if let Err(err) = write_response(&mut stream, response) {
        warn!(error = %err, "Failed to write response");
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, engine: &Arc<BridgeEngine>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    let game_id = if request.method.requires_game_id() {
        match parse_game_params(request.params) {
            Ok(params) => params.game_id,
            Err(err) => return Response::error_with_info(id, err),
        }
    } else {
        String::new()
    };

    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            });
            if let Ok(value) = serde_json::to_value(engine.status()) {
                data["engine"] = value;
            }
            Response::ok(id, data)
        }
        Method::Authenticate => respond(id, engine.authenticate(), "authentication"),
        Method::GetOwnedGames => {
            let games = engine.owned_games();
            if let Ok(games) = &games {
                tracing::debug!(games = games.len(), "Owned games snapshot");
            }
            respond(id, games, "owned games")
        }
        Method::GetLocalGames => {
            let games = engine.local_games();
            if let Ok(games) = &games {
                tracing::debug!(games = games.len(), "Local games snapshot");
            }
            respond(id, games, "local games")
        }
        Method::GetGameTime => respond(id, engine.game_time(&game_id), "game time"),
        Method::LaunchGame => {
            info!(game_id = %game_id, "Launch requested");
            respond(id, engine.launch_game(&game_id), "game time")
        }
        Method::InstallGame => respond(
            id,
            engine
                .install_game(&game_id)
                .map(|()| serde_json::json!({ "opened": true })),
            "install result",
        ),
        Method::UninstallGame => respond(
            id,
            engine
                .uninstall_game(&game_id)
                .map(|()| serde_json::json!({ "opened": true })),
            "uninstall result",
        ),
        Method::GetOsCompatibility => respond(
            id,
            Ok(serde_json::json!({
                "game_id": game_id,
                "os_compatibility": engine.os_compatibility(&game_id),
            })),
            "os compatibility",
        ),
        Method::Tick => {
            let launched: Vec<&str> = engine
                .tick()
                .iter()
                .map(|refresh| refresh.task.name())
                .collect();
            Response::ok(id, serde_json::json!({ "launched": launched }))
        }
    }
}

fn respond<T: Serialize>(
    id: Option<String>,
    result: Result<T, ItchError>,
    label: &str,
) -> Response {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize {}: {}", label, err),
            ),
        },
        Err(err) => {
            warn!(code = err.code(), error = %err, "Request failed");
            Response::error(id, err.code(), err.to_string())
        }
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use itch_core::{ManualClock, MemoryStore};

    fn engine(root: &Path) -> Arc<BridgeEngine> {
        Arc::new(BridgeEngine::new(
            Arc::new(ButlerDb::new(root.join("missing-butler.db"))),
            Arc::new(MemoryStore::new()),
            Arc::new(SystemLauncher),
            Arc::new(ManualClock::new(0)),
            itch_core::EngineSettings::default(),
        ))
    }

    fn request(method: Method, params: Option<serde_json::Value>) -> Request {
        Request {
            params,
            ..Request::new(method)
        }
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let mut req = request(Method::GetHealth, None);
        req.protocol_version = PROTOCOL_VERSION + 1;

        let response = handle_request(req, &engine(temp_dir.path()));
        assert!(!response.ok);
        assert_eq!(response.error.expect("error").code, "protocol_mismatch");
    }

    #[test]
    fn game_methods_require_params() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let response = handle_request(request(Method::LaunchGame, None), &engine(temp_dir.path()));
        assert!(!response.ok);
        assert_eq!(response.error.expect("error").code, "invalid_params");
    }

    #[test]
    fn store_errors_use_stable_codes() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let response =
            handle_request(request(Method::GetOwnedGames, None), &engine(temp_dir.path()));
        assert!(!response.ok);
        assert_eq!(
            response.error.expect("error").code,
            "data_store_unavailable"
        );
    }

    #[test]
    fn unplayed_game_time_is_null() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let response = handle_request(
            request(
                Method::GetGameTime,
                Some(serde_json::json!({ "game_id": "12" })),
            ),
            &engine(temp_dir.path()),
        );
        assert!(response.ok);
        let data = response.data.expect("data");
        assert_eq!(data["game_id"], "12");
        assert!(data["time_played"].is_null());
        assert!(data["last_played_time"].is_null());
    }

    #[test]
    fn os_compatibility_reports_windows() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let response = handle_request(
            request(
                Method::GetOsCompatibility,
                Some(serde_json::json!({ "game_id": "12" })),
            ),
            &engine(temp_dir.path()),
        );
        assert_eq!(response.data.expect("data")["os_compatibility"], "windows");
    }

    #[test]
    fn health_includes_refresh_tasks() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let response = handle_request(request(Method::GetHealth, None), &engine(temp_dir.path()));
        let data = response.data.expect("data");
        assert_eq!(data["status"], "ok");
        assert_eq!(
            data["engine"]["refresh_tasks"]
                .as_array()
                .map(|tasks| tasks.len()),
            Some(2)
        );
    }
}
