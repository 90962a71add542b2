mod cancel;
mod copy;
mod core;
mod download;
mod factory;
mod insert;
mod moving;
mod queue;
mod rename;
mod status;
mod storage;
mod sync;
mod trash;
mod upload;

pub use cancel::CancelToken;
pub use copy::CopyOperation;
pub use self::core::{FileAccess, Operation, Stream, StreamContext, StreamSnapshot};
pub use download::DownloadOperation;
pub use factory::StreamFactory;
pub use insert::{disambiguate_title, InsertOperation};
pub use moving::MoveOperation;
pub use queue::{QueueState, TransferEntry, TransferEvent, TransferEventKind, TransferQueue};
pub use rename::RenameOperation;
pub use status::{ProgressUnit, StreamKind, StreamStatus};
pub use storage::{MemoryTransferStore, SqliteTransferStore, TransferStore};
pub use trash::{TrashOperation, UntrashOperation};
pub use upload::UploadOperation;

/// 分块传输的最小块（256 KiB），其他块大小都是它的整数倍
pub const MIN_CHUNK_SIZE: u64 = 256 * 1024;
/// 默认块大小（10 MiB）
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
/// 最大块大小（100 MiB）
pub const MAX_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// 将块大小限制在范围内，并向上取整到 `MIN_CHUNK_SIZE` 的倍数
pub fn normalize_chunk_size(requested: u64) -> u64 {
    let clamped = requested.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
    clamped.div_ceil(MIN_CHUNK_SIZE) * MIN_CHUNK_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_is_clamped_and_rounded() {
        assert_eq!(normalize_chunk_size(0), MIN_CHUNK_SIZE);
        assert_eq!(normalize_chunk_size(MIN_CHUNK_SIZE + 1), 2 * MIN_CHUNK_SIZE);
        assert_eq!(normalize_chunk_size(u64::MAX), MAX_CHUNK_SIZE);
        assert_eq!(normalize_chunk_size(DEFAULT_CHUNK_SIZE), DEFAULT_CHUNK_SIZE);
    }
}
