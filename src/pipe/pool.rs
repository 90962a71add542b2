use crate::recover_lock;
use std::sync::{Arc, Mutex};

/// 重定向工作线程池，限制同时存活的私有管道数量。
///
/// 监听线程只做非阻塞的 `try_acquire`，名额用尽时直接拒绝重定向，
/// 保证公共管道始终能应答下一个客户端。
#[derive(Clone)]
pub struct WorkerPool {
    state: Arc<Mutex<PoolState>>,
}

struct PoolState {
    available: usize,
    max: usize,
}

impl WorkerPool {
    /// 创建容量为 `max` 的池（至少为 1）
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            state: Arc::new(Mutex::new(PoolState {
                available: max,
                max,
            })),
        }
    }

    /// 尝试占用一个名额；池已满时返回 `None`
    pub fn try_acquire(&self) -> Option<WorkerPermit> {
        let mut state = recover_lock(&self.state);
        if state.available == 0 {
            return None;
        }
        state.available -= 1;
        Some(WorkerPermit { pool: self.clone() })
    }

    /// 池的总容量
    pub fn capacity(&self) -> usize {
        recover_lock(&self.state).max
    }

    /// 当前被占用的名额数
    pub fn in_use(&self) -> usize {
        let state = recover_lock(&self.state);
        state.max - state.available
    }

    fn release(&self) {
        let mut state = recover_lock(&self.state);
        if state.available < state.max {
            state.available += 1;
        }
    }
}

/// 单个工作线程持有的名额，drop 时归还
pub struct WorkerPermit {
    pool: WorkerPool,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.pool.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_permits_are_bounded_and_released() {
        let pool = WorkerPool::new(2);
        let first = pool.try_acquire().unwrap();
        let second = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_use(), 2);

        drop(first);
        assert_eq!(pool.in_use(), 1);
        let third = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());

        thread::spawn(move || drop(second)).join().unwrap();
        drop(third);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn test_zero_capacity_still_allows_one_worker() {
        let pool = WorkerPool::new(0);
        let _permit = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
    }
}
