use super::{
    frame::ServicePipe,
    name::{is_redirect_guid, redirect_name, well_known_name},
};
use crate::config::ServiceConfig;
use crate::error::{ProxyError, ProxyResult};
use crossbeam_channel::{bounded, RecvTimeoutError};
use interprocess::local_socket::{prelude::*, GenericNamespaced, Stream};
use std::{thread, time::Duration};

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(150);

/// 管道协议的客户端。每次请求都新建连接，读取回复有超时。
#[derive(Debug, Clone)]
pub struct PipeClient {
    base_name: String,
    timeout: Duration,
    connect_retries: u32,
}

impl PipeClient {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            base_name: config.pipe_name.clone(),
            timeout: config.client_timeout(),
            connect_retries: config.connect_retries.max(1),
        }
    }

    /// 覆盖连接重试次数（至少 1 次）
    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries.max(1);
        self
    }

    pub fn pipe_name(&self) -> String {
        well_known_name(&self.base_name)
    }

    /// 服务端应答 `hello` 即为在线
    pub fn ping(&self) -> ProxyResult<()> {
        match self.request(&self.pipe_name(), "ping")? {
            reply if reply == "hello" => Ok(()),
            reply => Err(ProxyError::Protocol(format!("unexpected ping reply {reply:?}"))),
        }
    }

    /// 服务端当前运行的服务循环数（含公共管道）
    pub fn process_count(&self) -> ProxyResult<usize> {
        let reply = self.request(&self.pipe_name(), "process count")?;
        reply
            .trim()
            .parse()
            .map_err(|_| ProxyError::Protocol(format!("unexpected process count {reply:?}")))
    }

    /// 请求服务端停止监听
    pub fn shutdown(&self) -> ProxyResult<()> {
        match self.request(&self.pipe_name(), "disconnect")? {
            reply if reply == "disconnecting" => Ok(()),
            reply => Err(ProxyError::Protocol(format!(
                "unexpected disconnect reply {reply:?}"
            ))),
        }
    }

    /// 结束一次交互，不等待回复
    pub fn close(&self) -> ProxyResult<()> {
        let mut pipe = ServicePipe::new(self.connect(&self.pipe_name())?);
        pipe.write_message("close")
    }

    /// 申请私有管道并返回其 guid；服务端繁忙时返回 "redirect refused" 错误
    pub fn redirect(&self) -> ProxyResult<String> {
        let reply = self.request(&self.pipe_name(), "redirect")?;
        if is_redirect_guid(&reply) {
            Ok(reply)
        } else {
            Err(ProxyError::Pipe(format!("redirect refused: {reply}")))
        }
    }

    /// 先重定向，再在私有管道上执行一次方法调用并返回结果
    pub fn execute<S: AsRef<str>>(&self, args: &[S]) -> ProxyResult<String> {
        let message = args
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        if message.is_empty() {
            return Err(ProxyError::invalid_argument("no method given"));
        }
        let guid = self.redirect()?;
        self.request(&redirect_name(&self.base_name, &guid), &message)
    }

    fn request(&self, name: &str, message: &str) -> ProxyResult<String> {
        let mut pipe = ServicePipe::new(self.connect(name)?);
        pipe.write_message(message)?;

        let (tx, rx) = bounded(1);
        thread::Builder::new()
            .name("pipe-client-read".to_string())
            .spawn(move || {
                let _ = tx.send(pipe.read_message());
            })?;
        match rx.recv_timeout(self.timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => Err(ProxyError::Pipe(format!(
                "no reply on {name} within {}s",
                self.timeout.as_secs()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ProxyError::Pipe(format!("reader for {name} stopped")))
            }
        }
    }

    fn connect(&self, name: &str) -> ProxyResult<Stream> {
        let mut attempt = 1;
        loop {
            let ns_name = name
                .to_ns_name::<GenericNamespaced>()
                .map_err(|e| ProxyError::Pipe(format!("invalid pipe name {name}: {e}")))?;
            match Stream::connect(ns_name) {
                Ok(stream) => return Ok(stream),
                Err(err) if attempt < self.connect_retries => {
                    tracing::debug!(pipe = %name, attempt, error = %err, "retrying pipe connect");
                    attempt += 1;
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
                Err(err) => {
                    return Err(ProxyError::Pipe(format!("failed to connect to {name}: {err}")))
                }
            }
        }
    }
}
