use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use infradb_core::config::{infradb_dir_at, load_with_env_at};
use infradb_core::{EntityId, EntityKind};
use infradb_store::{ChangeFilter, Store, StoreError};
use infradb_sync::{pipeline, SyncReport};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse, ResponseStatus};

const DEFAULT_CHANGES_LIMIT: usize = 100;
const DEFAULT_HEALTH_HISTORY_LIMIT: usize = 20;

struct SyncJob {
    trigger: &'static str,
    respond_to: oneshot::Sender<Result<SyncReport, String>>,
}

/// Outcome of the most recent sync, for `status`.
#[derive(Debug, Clone, Serialize)]
struct LastSync {
    trigger: &'static str,
    finished_at_unix: u64,
    duration_ms: u128,
    success: bool,
}

struct Shared {
    home: PathBuf,
    store: Store,
    /// `None` when `sync.timeout_secs` is 0.
    sync_timeout: Option<Duration>,
    started_at_unix: u64,
    last_sync: RwLock<Option<LastSync>>,
}

/// Builds a multi-thread runtime and blocks on [`run`].
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("<tokio runtime>", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Opens the store, binds the socket and serves until `stop` or ctrl-c.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let dir = infradb_dir_at(&home);
    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let config = load_with_env_at(&home)?;
    let store = Store::create(
        config.db_path(&home),
        Duration::from_millis(config.database.busy_timeout_ms),
    )?;
    tracing::info!(db = %store.path().display(), "daemon store ready");

    let shared = Arc::new(Shared {
        home: home.clone(),
        store,
        sync_timeout: config.sync.timeout(),
        started_at_unix: unix_seconds_now(),
        last_sync: RwLock::new(None),
    });

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = sync_processor_task(shared, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(shared, sync_tx, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let interval_handle = {
        let shutdown = shutdown_tx.clone();
        let interval = Duration::from_secs(config.sync.interval_secs);
        tokio::spawn(async move {
            interval_sync_task(interval, sync_tx, shutdown.subscribe()).await;
            Ok::<(), DaemonError>(())
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

    let (processor_result, socket_result, interval_result, signal_result) =
        tokio::join!(processor_handle, socket_handle, interval_handle, signal_handle);

    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("interval_sync", interval_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Runs queued syncs one at a time, so there is a single discovery writer.
async fn sync_processor_task(
    shared: Arc<Shared>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                tracing::info!(trigger = job.trigger, "sync started");

                let home = shared.home.clone();
                let store = shared.store.clone();
                let result = tokio::task::spawn_blocking(move || -> Result<SyncReport, String> {
                    // Re-read config per run so edits apply without a restart.
                    let config = load_with_env_at(&home).map_err(|e| e.to_string())?;
                    let mut producers = pipeline::build_producers(&config, &home);
                    Ok(pipeline::run(&store, &mut producers))
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("sync task join error: {err}")))?;

                let elapsed = started.elapsed();
                match &result {
                    Ok(report) => {
                        tracing::info!(
                            trigger = job.trigger,
                            success = report.is_success(),
                            duration_ms = elapsed.as_millis() as u64,
                            "sync completed",
                        );
                        *shared.last_sync.write().await = Some(LastSync {
                            trigger: job.trigger,
                            finished_at_unix: unix_seconds_now(),
                            duration_ms: elapsed.as_millis(),
                            success: report.is_success(),
                        });
                    }
                    Err(err) => tracing::error!(trigger = job.trigger, error = %err, "sync failed"),
                }

                // The requester may have given up waiting.
                let _ = job.respond_to.send(result);
            }
        }
    }

    Ok(())
}

async fn interval_sync_task(
    every: Duration,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if every.is_zero() {
        let _ = shutdown_rx.recv().await;
        return;
    }
    tracing::info!(interval_secs = every.as_secs(), "periodic sync enabled");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let (tx, rx) = oneshot::channel();
                if sync_tx.send(SyncJob { trigger: "interval", respond_to: tx }).await.is_err() {
                    break;
                }
                if let Ok(Err(err)) = rx.await {
                    tracing::warn!(error = %err, "periodic sync failed");
                }
            }
        }
    }
}

async fn socket_server_task(
    shared: Arc<Shared>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&shared.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared, sync_tx, shutdown_tx).await {
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

async fn handle_socket_client(
    stream: UnixStream,
    shared: Arc<Shared>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
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

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::bad_request(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&shared).await),
            "sync" => enqueue_sync(&sync_tx, "socket", shared.sync_timeout).await,
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            _ => {
                let store = shared.store.clone();
                let request = request.clone();
                tokio::task::spawn_blocking(move || dispatch_read(&store, &request))
                    .await
                    .unwrap_or_else(|err| DaemonResponse::error(format!("read task join error: {err}")))
            }
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// Answers a read command against the store. Never writes.
pub fn dispatch_read(store: &Store, request: &DaemonRequest) -> DaemonResponse {
    let result: Result<DaemonResponse, StoreError> = (|| {
        Ok(match request.cmd.as_str() {
            "health" => {
                store.ping()?;
                DaemonResponse::ok(json!({ "status": "healthy", "database": "connected" }))
            }
            "hosts" => DaemonResponse::ok(serde_json::to_value(store.hosts()?)?),
            "host" => {
                let Some(hostname) = request.hostname.as_deref() else {
                    return Ok(DaemonResponse::bad_request("'host' requires 'hostname'"));
                };
                match store.host_detail(hostname)? {
                    Some(detail) => DaemonResponse::ok(serde_json::to_value(detail)?),
                    None => DaemonResponse::not_found(format!("host '{hostname}' not found")),
                }
            }
            "containers" => {
                let containers = match request.host_id {
                    Some(id) => store.containers_for_host(EntityId(id))?,
                    None => store.containers()?,
                };
                DaemonResponse::ok(serde_json::to_value(containers)?)
            }
            "stats" => DaemonResponse::ok(serde_json::to_value(store.stats()?)?),
            "topology" => DaemonResponse::ok(serde_json::to_value(store.topology()?)?),
            "utilization" => DaemonResponse::ok(serde_json::to_value(store.ram_utilization()?)?),
            "guests" => {
                let node = match (request.host_id, request.hostname.as_deref()) {
                    (Some(id), _) => EntityId(id),
                    (None, Some(hostname)) => match store.host_by_name(hostname)? {
                        Some(host) => host.id,
                        None => return Ok(DaemonResponse::not_found(format!("host '{hostname}' not found"))),
                    },
                    (None, None) => {
                        return Ok(DaemonResponse::bad_request("'guests' requires 'hostname' or 'host_id'"))
                    }
                };
                DaemonResponse::ok(serde_json::to_value(store.proxmox_guests(node)?)?)
            }
            "service-deps" => {
                let Some(id) = request.service_id else {
                    return Ok(DaemonResponse::bad_request("'service-deps' requires 'service_id'"));
                };
                DaemonResponse::ok(serde_json::to_value(store.dependent_services(EntityId(id))?)?)
            }
            "health-history" => {
                let Some(id) = request.service_id else {
                    return Ok(DaemonResponse::bad_request("'health-history' requires 'service_id'"));
                };
                let limit = request.limit.unwrap_or(DEFAULT_HEALTH_HISTORY_LIMIT);
                DaemonResponse::ok(serde_json::to_value(store.health_history(EntityId(id), limit)?)?)
            }
            "changes" => {
                let entity_type = match request.entity_type.as_deref().map(str::parse::<EntityKind>) {
                    None => None,
                    Some(Ok(kind)) => Some(kind),
                    Some(Err(err)) => return Ok(DaemonResponse::bad_request(err)),
                };
                let filter = ChangeFilter {
                    entity_type,
                    entity_id: request.entity_id.map(EntityId),
                    limit: Some(request.limit.unwrap_or(DEFAULT_CHANGES_LIMIT)),
                };
                DaemonResponse::ok(serde_json::to_value(store.changes(&filter)?)?)
            }
            other => DaemonResponse::bad_request(format!("unknown command '{other}'")),
        })
    })();

    result.unwrap_or_else(|err| {
        tracing::error!(cmd = %request.cmd, error = %err, "read failed");
        DaemonResponse::error(err.to_string())
    })
}

async fn build_status_payload(shared: &Shared) -> Value {
    let last_sync = shared.last_sync.read().await.clone();
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": shared.started_at_unix,
        "last_sync": last_sync,
        "socket": socket_path(&shared.home).display().to_string(),
        "database": shared.store.path().display().to_string(),
        "sync_timeout_secs": shared.sync_timeout.map(|t| t.as_secs()),
    })
}

/// Queues a sync and waits up to `timeout` for its report, or until it
/// finishes when `timeout` is `None`.
///
/// A timed-out sync keeps running in the processor; only the wait is bounded.
async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    trigger: &'static str,
    timeout: Option<Duration>,
) -> DaemonResponse {
    let (tx, rx) = oneshot::channel();
    if sync_tx
        .send(SyncJob {
            trigger,
            respond_to: tx,
        })
        .await
        .is_err()
    {
        return DaemonResponse::error(DaemonError::ChannelClosed("sync queue").to_string());
    }

    let answer = match timeout {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(answer) => answer,
            Err(_) => {
                return DaemonResponse::failure(
                    ResponseStatus::TimedOut,
                    format!("sync did not finish within {}s", limit.as_secs()),
                )
            }
        },
        None => rx.await,
    };

    match answer {
        Ok(Ok(report)) => match serde_json::to_value(&report) {
            Ok(data) => DaemonResponse::ok(data),
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        Ok(Err(err)) => DaemonResponse::error(err),
        Err(_) => DaemonResponse::error(DaemonError::ChannelClosed("sync response").to_string()),
    }
}

/// Clears a socket file left by a daemon that died without cleanup. A socket
/// that still accepts connections belongs to a live daemon.
fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if StdUnixStream::connect(socket).is_ok() {
        return Err(DaemonError::Protocol(format!(
            "another daemon is listening on {}",
            socket.display()
        )));
    }
    match fs::remove_file(socket) {
        Ok(()) => {
            tracing::warn!(socket = %socket.display(), "removed stale daemon socket");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
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
    result.map_err(|err| DaemonError::Protocol(format!("{task} task aborted: {err}")))?
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Installs the global `tracing` subscriber once. `RUST_LOG` overrides the
/// default `info` filter. Output goes to stderr.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
