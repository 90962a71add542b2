use super::{
    frame::ServicePipe,
    name::{new_redirect_guid, redirect_name, well_known_name},
    pool::{WorkerPermit, WorkerPool},
};
use crate::config::ServiceConfig;
use crate::error::{ProxyError, ProxyResult};
use crossbeam_channel::{bounded, RecvTimeoutError};
use interprocess::local_socket::{
    prelude::*, GenericNamespaced, Listener, ListenerNonblockingMode, ListenerOptions, Stream,
};
use std::{
    io::ErrorKind,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const BIND_ATTEMPTS: u32 = 10;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(150);
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// 处理非控制消息：参数为按逗号拆分的参数列表，返回值原样写回客户端
pub trait RequestHandler: Send + Sync {
    fn handle(&self, args: Vec<String>) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Continue,
    DisconnectClient,
    DisconnectServer,
}

/// 公共管道上的服务端。
///
/// 控制消息（`ping`、`process count`、`close`、`disconnect`）就地应答；
/// `redirect` 为调用方创建私有管道，交给池中的工作线程处理。
#[derive(Clone)]
pub struct PipeServer {
    shared: Arc<ServerShared>,
}

struct ServerShared {
    base_name: String,
    handler: Arc<dyn RequestHandler>,
    pool: WorkerPool,
    active: AtomicUsize,
    accept_timeout: Duration,
    read_timeout: Duration,
}

/// 为 `process count` 计数的守卫
struct ActiveGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PipeServer {
    /// 按配置创建服务端，尚未开始监听
    pub fn new(config: &ServiceConfig, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                base_name: config.pipe_name.clone(),
                handler,
                pool: WorkerPool::new(config.max_sessions),
                active: AtomicUsize::new(0),
                accept_timeout: config.redirect_accept_timeout(),
                read_timeout: config.request_read_timeout(),
            }),
        }
    }

    pub fn pipe_name(&self) -> String {
        well_known_name(&self.shared.base_name)
    }

    /// 当前运行的服务循环数（含公共管道）
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// 在公共管道上服务，直到收到 `disconnect`
    pub fn run(&self) -> ProxyResult<()> {
        let name = self.pipe_name();
        let listener = bind_with_retry(&name)?;
        let _active = ActiveGuard::enter(&self.shared.active);
        tracing::info!(pipe = %name, "pipe server listening");

        loop {
            let connection = match listener.accept() {
                Ok(connection) => connection,
                Err(err) => {
                    tracing::warn!(pipe = %name, error = %err, "failed to accept pipe client");
                    thread::sleep(BIND_RETRY_DELAY);
                    continue;
                }
            };
            match self.exchange(connection) {
                Outcome::DisconnectServer => {
                    tracing::info!(pipe = %name, "pipe server shutting down");
                    break;
                }
                Outcome::DisconnectClient => {
                    tracing::debug!(pipe = %name, "client closed the exchange")
                }
                Outcome::Continue => {}
            }
        }
        Ok(())
    }

    /// 在私有管道上只服务一次交互；客户端超时未连接则放弃
    fn serve_redirected(&self, listener: Listener, name: &str, _permit: WorkerPermit) {
        let _active = ActiveGuard::enter(&self.shared.active);
        let deadline = Instant::now() + self.shared.accept_timeout;
        loop {
            match listener.accept() {
                Ok(connection) => {
                    self.exchange(connection);
                    return;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        tracing::warn!(pipe = %name, "redirected client never connected");
                        return;
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => {
                    tracing::warn!(pipe = %name, error = %err, "failed to accept redirected client");
                    return;
                }
            }
        }
    }

    fn exchange(&self, connection: Stream) -> Outcome {
        let (mut pipe, message) = match read_request(connection, self.shared.read_timeout) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read pipe request");
                return Outcome::Continue;
            }
        };
        let (reply, outcome) = match message.as_str() {
            "ping" => (Some("hello".to_string()), Outcome::Continue),
            "redirect" => (Some(self.redirect()), Outcome::Continue),
            "process count" => (Some(self.active_count().to_string()), Outcome::Continue),
            "close" => (None, Outcome::DisconnectClient),
            "disconnect" => (Some("disconnecting".to_string()), Outcome::DisconnectServer),
            _ => {
                let args = message.split(',').map(str::to_string).collect();
                (Some(self.shared.handler.handle(args)), Outcome::Continue)
            }
        };
        if let Some(reply) = reply {
            if let Err(err) = pipe.write_message(&reply) {
                tracing::warn!(error = %err, "failed to write pipe reply");
            }
        }
        outcome
    }

    /// 创建私有管道并启动工作线程，返回客户端重连用的 guid。
    ///
    /// 池已满时立即拒绝，不阻塞公共管道。
    fn redirect(&self) -> String {
        let Some(permit) = self.shared.pool.try_acquire() else {
            let capacity = self.shared.pool.capacity();
            tracing::warn!(capacity, "all pipe workers are busy, refusing redirect");
            return format!("error: all {capacity} pipe workers are busy");
        };
        let guid = new_redirect_guid();
        let name = redirect_name(&self.shared.base_name, &guid);
        let listener = match bind(&name, ListenerNonblockingMode::Accept) {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(pipe = %name, error = %err, "failed to create redirected pipe");
                return format!("error: {err}");
            }
        };
        let server = self.clone();
        let worker_name = name.clone();
        let spawned = thread::Builder::new()
            .name(format!("pipe-{guid}"))
            .spawn(move || server.serve_redirected(listener, &worker_name, permit));
        match spawned {
            Ok(_) => {
                tracing::debug!(pipe = %name, "redirected client");
                guid
            }
            Err(err) => {
                tracing::error!(pipe = %name, error = %err, "failed to spawn pipe worker");
                format!("error: failed to spawn pipe worker: {err}")
            }
        }
    }
}

/// 在后台线程读取一条请求，超过 `timeout` 未读完则放弃该连接。
///
/// 读取线程会一直阻塞到对端关闭连接为止，但监听线程不再等待它。
fn read_request(
    connection: Stream,
    timeout: Duration,
) -> ProxyResult<(ServicePipe<Stream>, String)> {
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("pipe-request-read".to_string())
        .spawn(move || {
            let mut pipe = ServicePipe::new(connection);
            let request = pipe.read_message().map(|message| (pipe, message));
            let _ = tx.send(request);
        })?;
    match rx.recv_timeout(timeout) {
        Ok(request) => request,
        Err(RecvTimeoutError::Timeout) => Err(ProxyError::Pipe(format!(
            "no request within {}s, dropping connection",
            timeout.as_secs()
        ))),
        Err(RecvTimeoutError::Disconnected) => {
            Err(ProxyError::Pipe("request reader stopped".to_string()))
        }
    }
}

fn bind(name: &str, mode: ListenerNonblockingMode) -> ProxyResult<Listener> {
    let ns_name = name
        .to_ns_name::<GenericNamespaced>()
        .map_err(|e| ProxyError::Pipe(format!("invalid pipe name {name}: {e}")))?;
    ListenerOptions::new()
        .name(ns_name)
        .nonblocking(mode)
        .create_sync()
        .map_err(|e| ProxyError::Pipe(format!("failed to create pipe {name}: {e}")))
}

fn bind_with_retry(name: &str) -> ProxyResult<Listener> {
    let mut attempt = 1;
    loop {
        match bind(name, ListenerNonblockingMode::Neither) {
            Ok(listener) => return Ok(listener),
            Err(err) if attempt < BIND_ATTEMPTS => {
                tracing::debug!(pipe = %name, attempt, error = %err, "retrying pipe creation");
                attempt += 1;
                thread::sleep(BIND_RETRY_DELAY);
            }
            Err(err) => return Err(err),
        }
    }
}
