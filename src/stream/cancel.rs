use crate::error::{ProxyError, ProxyResult};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// 流与其驱动的远程调用之间共享的取消标志
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// 已取消时返回 `ProxyError::Cancelled`
    pub fn check(&self) -> ProxyResult<()> {
        if self.is_cancelled() {
            Err(ProxyError::Cancelled)
        } else {
            Ok(())
        }
    }
}
