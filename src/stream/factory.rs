use super::{
    core::{Operation, Stream, StreamSnapshot},
    normalize_chunk_size,
    queue::TransferQueue,
    DEFAULT_CHUNK_SIZE,
};
use crate::api::drive::RemoteFileService;
use crate::error::ProxyResult;
use std::sync::Arc;

/// 流工厂：创建的流共享同一个远程服务和同一个传输队列
#[derive(Clone)]
pub struct StreamFactory {
    service: Arc<dyn RemoteFileService>,
    transfers: TransferQueue,
    default_chunk_size: u64,
}

impl StreamFactory {
    pub fn new(service: Arc<dyn RemoteFileService>, transfers: TransferQueue) -> Self {
        Self {
            service,
            transfers,
            default_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// 设置默认块大小（会被规整到合法范围）
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.default_chunk_size = normalize_chunk_size(chunk_size);
        self
    }

    pub fn service(&self) -> &Arc<dyn RemoteFileService> {
        &self.service
    }

    pub fn transfers(&self) -> &TransferQueue {
        &self.transfers
    }

    /// 规整调用方给出的块大小；未给出时用默认值
    pub fn chunk_size(&self, requested: Option<u64>) -> u64 {
        requested
            .map(normalize_chunk_size)
            .unwrap_or(self.default_chunk_size)
    }

    /// 创建一个尚未初始化的流
    pub fn create(&self) -> Stream {
        Stream::new(self.clone())
    }

    pub fn queue(&self, stream: &Stream) -> ProxyResult<()> {
        stream.queue()
    }

    pub fn start(&self, stream: &Stream) -> ProxyResult<()> {
        stream.start()
    }

    /// 为 `operation` 创建流并依次初始化、入队、启动
    pub fn spawn<O: Operation + 'static>(&self, operation: O) -> ProxyResult<Stream> {
        let stream = self.create();
        stream.init(operation)?;
        self.queue(&stream)?;
        self.start(&stream)?;
        Ok(stream)
    }

    /// 执行 `operation` 直到终态，返回最终快照
    pub fn run<O: Operation + 'static>(&self, operation: O) -> ProxyResult<StreamSnapshot> {
        Ok(self.spawn(operation)?.wait())
    }
}
