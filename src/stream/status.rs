use std::fmt;

/// 流的可见状态。
///
/// “已结束”（finished）单独记录：流进入终态、释放资源并上报队列之后才置位。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    NotStarted,
    Queued,
    Starting,
    Processing,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl StreamStatus {
    /// 已启动且尚未进入终态
    pub fn is_started(self) -> bool {
        matches!(
            self,
            StreamStatus::Starting | StreamStatus::Processing | StreamStatus::Cancelling
        )
    }

    /// 是否为终态（已取消、已完成、失败）
    pub fn is_processed(self) -> bool {
        matches!(
            self,
            StreamStatus::Cancelled | StreamStatus::Completed | StreamStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamStatus::NotStarted => "NotStarted",
            StreamStatus::Queued => "Queued",
            StreamStatus::Starting => "Starting",
            StreamStatus::Processing => "Processing",
            StreamStatus::Cancelling => "Cancelling",
            StreamStatus::Cancelled => "Cancelled",
            StreamStatus::Completed => "Completed",
            StreamStatus::Failed => "Failed",
        }
    }

    pub(crate) fn to_i64(self) -> i64 {
        match self {
            StreamStatus::NotStarted => 0,
            StreamStatus::Queued => 1,
            StreamStatus::Starting => 2,
            StreamStatus::Processing => 3,
            StreamStatus::Cancelling => 4,
            StreamStatus::Cancelled => 5,
            StreamStatus::Completed => 6,
            StreamStatus::Failed => 7,
        }
    }

    pub(crate) fn from_i64(value: i64) -> Self {
        match value {
            1 => StreamStatus::Queued,
            2 => StreamStatus::Starting,
            3 => StreamStatus::Processing,
            4 => StreamStatus::Cancelling,
            5 => StreamStatus::Cancelled,
            6 => StreamStatus::Completed,
            7 => StreamStatus::Failed,
            _ => StreamStatus::NotStarted,
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `bytes_processed` / `total_bytes` 的计量单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressUnit {
    Bytes,
    /// 条目数（文件与文件夹），用于文件夹复制和元数据操作
    Items,
}

impl ProgressUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressUnit::Bytes => "Bytes",
            ProgressUnit::Items => "Items",
        }
    }

    pub(crate) fn to_i64(self) -> i64 {
        match self {
            ProgressUnit::Bytes => 0,
            ProgressUnit::Items => 1,
        }
    }

    pub(crate) fn from_i64(value: i64) -> Self {
        if value == 1 {
            ProgressUnit::Items
        } else {
            ProgressUnit::Bytes
        }
    }
}

/// 流执行的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Download,
    Upload,
    Insert,
    Copy,
    Move,
    Rename,
    Trash,
    Untrash,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Download => "Download",
            StreamKind::Upload => "Upload",
            StreamKind::Insert => "Insert",
            StreamKind::Copy => "Copy",
            StreamKind::Move => "Move",
            StreamKind::Rename => "Rename",
            StreamKind::Trash => "Trash",
            StreamKind::Untrash => "Untrash",
        }
    }

    /// 只有上传、下载需要独占锁定本地文件
    pub fn locks_local_file(self) -> bool {
        matches!(self, StreamKind::Download | StreamKind::Upload)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
