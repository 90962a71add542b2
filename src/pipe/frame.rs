use crate::error::{ProxyError, ProxyResult};
use std::{
    io::{self, ErrorKind, Read, Write},
    thread,
    time::Duration,
};

/// 长度头的宽度（UTF-16 码元数）
pub const HEADER_UNITS: usize = 8;
/// 8 位十进制长度头能表示的最大负载
pub const MAX_MESSAGE_UNITS: usize = 99_999_999;

const IO_ATTEMPTS: u32 = 10;
const IO_RETRY_DELAY: Duration = Duration::from_millis(150);

/// 双工字节流上的消息分帧。
///
/// 每帧先是 8 个码元、左对齐并以空格补齐的十进制长度，随后是负载，均为 UTF-16LE。
/// 短读会续读，瞬时错误最多重试 10 次。
pub struct ServicePipe<S> {
    stream: S,
    retry_delay: Duration,
}

impl<S: Read + Write> ServicePipe<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            retry_delay: IO_RETRY_DELAY,
        }
    }

    /// 覆盖重试间隔
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// 写入一帧并刷新
    pub fn write_message(&mut self, message: &str) -> ProxyResult<()> {
        let frame = encode_frame(message)?;
        self.write_fully(&frame)?;
        let mut failures = 0;
        loop {
            match self.stream.flush() {
                Ok(()) => return Ok(()),
                Err(err) => self.on_failure(err, &mut failures, "flush")?,
            }
        }
    }

    /// 读取一帧；长度头非法或超出上限时返回协议错误
    pub fn read_message(&mut self) -> ProxyResult<String> {
        let mut header = [0u8; HEADER_UNITS * 2];
        self.read_fully(&mut header)?;
        let header = decode_units(&header)?;
        let length: usize = header.trim().parse().map_err(|_| {
            ProxyError::Protocol(format!("invalid frame header {header:?}"))
        })?;
        if length > MAX_MESSAGE_UNITS {
            return Err(ProxyError::Protocol(format!(
                "frame of {length} units is too large"
            )));
        }
        let mut payload = vec![0u8; length * 2];
        self.read_fully(&mut payload)?;
        decode_units(&payload)
    }

    fn write_fully(&mut self, bytes: &[u8]) -> ProxyResult<()> {
        let mut written = 0;
        let mut failures = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(ProxyError::Pipe("pipe closed while writing".to_string())),
                Ok(n) => written += n,
                Err(err) => self.on_failure(err, &mut failures, "write")?,
            }
        }
        Ok(())
    }

    /// 读满 `buf`，短读续读，瞬时错误重试
    fn read_fully(&mut self, buf: &mut [u8]) -> ProxyResult<()> {
        let mut filled = 0;
        let mut failures = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(ProxyError::Pipe("pipe closed by peer".to_string())),
                Ok(n) => filled += n,
                Err(err) => self.on_failure(err, &mut failures, "read")?,
            }
        }
        Ok(())
    }

    fn on_failure(&self, err: io::Error, failures: &mut u32, action: &str) -> ProxyResult<()> {
        if err.kind() == ErrorKind::Interrupted {
            return Ok(());
        }
        if is_peer_gone(&err) {
            return Err(ProxyError::Pipe(format!("pipe {action} failed: {err}")));
        }
        *failures += 1;
        if *failures >= IO_ATTEMPTS {
            return Err(ProxyError::Pipe(format!(
                "pipe {action} failed after {IO_ATTEMPTS} attempts: {err}"
            )));
        }
        tracing::debug!(action, attempt = *failures, error = %err, "retrying pipe io");
        thread::sleep(self.retry_delay);
        Ok(())
    }
}

fn is_peer_gone(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
    )
}

/// 将 `message` 编码为一帧
pub fn encode_frame(message: &str) -> ProxyResult<Vec<u8>> {
    let units: Vec<u16> = message.encode_utf16().collect();
    if units.len() > MAX_MESSAGE_UNITS {
        return Err(ProxyError::Protocol(format!(
            "message of {} units is too large",
            units.len()
        )));
    }
    let header = format!("{:<width$}", units.len(), width = HEADER_UNITS);
    let mut frame = Vec::with_capacity((HEADER_UNITS + units.len()) * 2);
    for unit in header.encode_utf16().chain(units) {
        frame.extend_from_slice(&unit.to_le_bytes());
    }
    Ok(frame)
}

fn decode_units(bytes: &[u8]) -> ProxyResult<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| ProxyError::Protocol(format!("invalid UTF-16 payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// 回环流：每次最多读出 `max_read` 字节，前 `failures` 次读返回 `WouldBlock`
    #[derive(Default)]
    struct Loopback {
        buffer: VecDeque<u8>,
        max_read: usize,
        failures: u32,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::new(ErrorKind::WouldBlock, "not yet"));
            }
            let limit = if self.max_read == 0 { buf.len() } else { self.max_read };
            let n = limit.min(buf.len()).min(self.buffer.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.buffer.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buffer.extend(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_round_trip_preserves_content() {
        let mut pipe = ServicePipe::new(Loopback::default());
        for length in [0usize, 1, 1000] {
            let message: String = "ä,b".chars().cycle().take(length).collect();
            pipe.write_message(&message).unwrap();
            assert_eq!(pipe.read_message().unwrap(), message);
        }
    }

    #[test]
    fn test_header_is_space_padded_utf16() {
        let frame = encode_frame("hello").unwrap();
        assert_eq!(frame.len(), (HEADER_UNITS + 5) * 2);
        assert_eq!(decode_units(&frame[..HEADER_UNITS * 2]).unwrap(), "5       ");
    }

    #[test]
    fn test_short_reads_and_transient_errors_are_retried() {
        let stream = Loopback {
            max_read: 3,
            failures: 2,
            ..Loopback::default()
        };
        let mut pipe = ServicePipe::new(stream).with_retry_delay(Duration::ZERO);
        pipe.write_message("redirect").unwrap();
        assert_eq!(pipe.read_message().unwrap(), "redirect");
    }

    #[test]
    fn test_closed_peer_and_bad_header_fail() {
        let mut pipe = ServicePipe::new(Loopback::default());
        assert!(matches!(pipe.read_message(), Err(ProxyError::Pipe(_))));

        let mut stream = Loopback::default();
        stream
            .buffer
            .extend("abcdefgh".encode_utf16().flat_map(u16::to_le_bytes));
        let mut pipe = ServicePipe::new(stream);
        assert!(matches!(pipe.read_message(), Err(ProxyError::Protocol(_))));
    }
}
