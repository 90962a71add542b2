pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod pipe;
pub mod service;
pub mod stream;

pub use error::{ProxyError, ProxyResult};

use std::sync::{Mutex, MutexGuard};

/// 获取互斥锁；若持有者线程 panic 导致锁中毒，则继续使用其中的数据。
pub(crate) fn recover_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn test_recover_lock_survives_poisoning() {
        let shared = Arc::new(Mutex::new(1));
        let poisoner = {
            let shared = shared.clone();
            thread::spawn(move || {
                let _guard = shared.lock().unwrap();
                panic!("poison the lock");
            })
        };
        assert!(poisoner.join().is_err());
        assert!(shared.is_poisoned());

        *recover_lock(&shared) += 1;
        assert_eq!(*recover_lock(&shared), 2);
    }
}
