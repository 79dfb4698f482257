use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use cloudsync_core::config;
use cloudsync_sync::{
    EngineSettings, FileHost, Host, HttpStore, ReconciliationLoop, RemoteStore, SessionStatus,
    SyncSession,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{cloudsync_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Payload of the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub started_at_unix: u64,
    pub server_url: String,
    #[serde(flatten)]
    pub session: SessionStatus,
}

struct Control<H, R> {
    engine: ReconciliationLoop<H, R>,
    server_url: String,
    started_at_unix: u64,
}

impl<H, R> Control<H, R>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    fn status(&self) -> DaemonStatus {
        DaemonStatus {
            running: !self.engine.session().is_closed(),
            started_at_unix: self.started_at_unix,
            server_url: self.server_url.clone(),
            session: self.engine.session().status(),
        }
    }
}

/// Start the daemon and block the current thread until it exits.
///
/// The engine is single-threaded: every task runs on one current-thread
/// runtime, with blocking file and HTTP calls pushed to the blocking pool.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load the config under `home`, bootstrap a session against the
/// configured store and serve the control socket until stopped.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    ensure_runtime_dirs(&home)?;

    let variables = config.variables_path(&home);
    let host = FileHost::new(variables.clone());
    let remote = HttpStore::from_config(&config);
    let session = SyncSession::new(host, remote, EngineSettings::from_config(&config));

    tracing::info!(
        server_url = %config.server_url,
        variables = %variables.display(),
        prefix = %config.name_prefix,
        "starting cloudsync daemon",
    );
    let engine = ReconciliationLoop::start(session).await?;

    let control = Arc::new(Control {
        engine,
        server_url: config.server_url.clone(),
        started_at_unix: unix_seconds_now(),
    });
    serve(home, control).await
}

async fn serve<H, R>(home: PathBuf, control: Arc<Control<H, R>>) -> Result<(), DaemonError>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let control = Arc::clone(&control);
        let home = home.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(home, control, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    control.engine.shutdown().await;
    tracing::info!("cloudsync daemon stopped");

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn socket_server_task<H, R>(
    home: PathBuf,
    control: Arc<Control<H, R>>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let control = Arc::clone(&control);
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, control, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client<H, R>(
    stream: UnixStream,
    control: Arc<Control<H, R>>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stopping = request.cmd == "stop";
        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(serde_json::to_value(control.status())?),
            "stop" => {
                tracing::info!("stop requested over control socket");
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

/// Remove a socket file left behind by a dead daemon. A socket that still
/// accepts connections belongs to a live daemon and is an error.
fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = cloudsync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cloudsync_sync::testing::{MemoryHost, MemoryStore};
    use serde_json::Value;
    use tempfile::TempDir;

    use crate::protocol::{request_status, request_stop, send_request};

    async fn memory_control() -> Arc<Control<MemoryHost, MemoryStore>> {
        let host = MemoryHost::new().with_variable("CloudScore", "3");
        let store = MemoryStore::new().with_variable("CloudScore", "3");
        let settings = EngineSettings {
            name_prefix: "Cloud".to_string(),
            ..EngineSettings::default()
        };
        let engine = ReconciliationLoop::start(SyncSession::new(host, store, settings))
            .await
            .expect("start engine");
        Arc::new(Control {
            engine,
            server_url: "http://localhost:3000".to_string(),
            started_at_unix: 1_000_000,
        })
    }

    async fn wait_for_socket(path: &Path) {
        for _ in 0..200 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("socket never appeared at {}", path.display());
    }

    #[tokio::test]
    async fn status_payload_flattens_session_status() {
        let control = memory_control().await;

        let payload = serde_json::to_value(control.status()).expect("encode status");

        assert_eq!(payload["running"], Value::Bool(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["server_url"], json!("http://localhost:3000"));
        assert_eq!(payload["initialized"], Value::Bool(true));
        assert_eq!(payload["tracked"], json!(1));
        assert_eq!(payload["variables"][0]["name"], json!("CloudScore"));
        assert_eq!(payload["variables"][0]["value"], json!("3"));
        control.engine.shutdown().await;
    }

    #[tokio::test]
    async fn socket_serves_status_then_stops() {
        let home = TempDir::new().expect("home");
        fs::create_dir_all(cloudsync_root(home.path())).expect("root dir");
        let control = memory_control().await;

        let server = tokio::spawn(serve(home.path().to_path_buf(), Arc::clone(&control)));
        let socket = socket_path(home.path());
        wait_for_socket(&socket).await;

        let home_path = home.path().to_path_buf();
        let (status, bogus) = tokio::task::spawn_blocking(move || {
            let status = request_status(&home_path).expect("status");
            let bogus = send_request(
                &home_path,
                &DaemonRequest {
                    cmd: "sync".to_string(),
                },
            )
            .expect("response to unknown command");
            request_stop(&home_path).expect("stop");
            (status, bogus)
        })
        .await
        .expect("client thread");

        assert_eq!(status["initialized"], Value::Bool(true));
        assert!(!bogus.ok);
        assert_eq!(bogus.error.as_deref(), Some("unknown command 'sync'"));

        server.await.expect("join").expect("serve exits cleanly");
        assert!(!socket.exists(), "socket removed on shutdown");
        assert!(control.engine.session().is_closed());
    }

    #[test]
    fn stale_socket_file_is_removed_before_bind() {
        let home = TempDir::new().expect("home");
        let socket = socket_path(home.path());
        fs::create_dir_all(cloudsync_root(home.path())).expect("root dir");
        fs::write(&socket, b"").expect("stale file");

        prepare_socket_for_bind(&socket).expect("stale socket cleared");
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn missing_variables_file_fails_startup() {
        let home = TempDir::new().expect("home");
        let err = run(home.path().to_path_buf())
            .await
            .expect_err("no variables file");
        assert!(matches!(err, DaemonError::Sync(_)));
    }
}
