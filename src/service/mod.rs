mod context;
mod handlers;
mod open;
mod registry;
pub mod xml;

pub use context::ServiceContext;
pub use open::{open_remote_file, resolve_local_path};
pub use registry::{registry, MethodHandler, MethodId, Parameter, ParameterKind, Registry};

use crate::error::ProxyError;
use crate::pipe::RequestHandler;
use std::sync::Arc;

const DEBUG_TOKEN: &str = "Debug";

/// 将参数列表分发到方法注册表
#[derive(Clone)]
pub struct Service {
    ctx: Arc<ServiceContext>,
}

impl Service {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// 执行 `[method, args...]`（可带 `Debug` 前缀）并返回响应文本。
    ///
    /// 失败时返回 `<Error>` 块；方法无法解析时附带完整的方法目录。
    pub fn execute<S: AsRef<str>>(&self, args: &[S]) -> String {
        let mut args: Vec<String> = args.iter().map(|arg| arg.as_ref().to_string()).collect();
        let debug = args
            .first()
            .is_some_and(|first| first.trim().eq_ignore_ascii_case(DEBUG_TOKEN));
        if debug {
            args.remove(0);
            tracing::info!(args = ?args, "debug call");
        }

        let registry = match registry() {
            Ok(registry) => registry,
            Err(err) => return xml::error(&err, None),
        };
        let Some((method, rest)) = args.split_first() else {
            return xml::error(
                &ProxyError::UnknownMethod("no method given".to_string()),
                Some(registry),
            );
        };
        let handler = match registry.resolve(method) {
            Ok(handler) => handler,
            Err(err) => {
                tracing::warn!(method = %method, "unknown method requested");
                return xml::error(&err, Some(registry));
            }
        };

        let span = if debug {
            tracing::info_span!("method", method = %handler.id())
        } else {
            tracing::debug_span!("method", method = %handler.id())
        };
        let _entered = span.enter();
        match handler.invoke(&self.ctx, rest) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "method failed");
                xml::error(&err, None)
            }
        }
    }
}

impl RequestHandler for Service {
    fn handle(&self, args: Vec<String>) -> String {
        self.execute(&args)
    }
}
