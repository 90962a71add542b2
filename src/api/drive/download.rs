use super::{
    client::{check_status, DriveClient},
    models::FileInfo,
    ProgressFn,
};
use crate::error::{ProxyError, ProxyResult};
use crate::stream::CancelToken;
use reqwest::header::RANGE;
use std::io::{self, Read, Write};

impl DriveClient {
    /// 按 `chunk_size` 分段请求内容，段与段之间检查取消。
    /// 服务端忽略 `Range` 时一次性复制整个响应。
    pub(super) fn download_content(
        &self,
        file: &FileInfo,
        writer: &mut dyn Write,
        chunk_size: u64,
        cancel: &CancelToken,
        progress: &mut ProgressFn<'_>,
    ) -> ProxyResult<u64> {
        let url = file.download_url.clone().ok_or_else(|| {
            ProxyError::invalid_state(format!("{} has no downloadable content", file.title))
        })?;
        let total = file.file_size;
        if total == 0 {
            progress(0, 0);
            return Ok(0);
        }

        let token = self.access_token()?;
        let chunk_size = chunk_size.max(1);
        let mut offset = 0u64;
        while offset < total {
            cancel.check()?;
            let end = (offset + chunk_size).min(total) - 1;
            let response = self
                .transfer_http
                .get(&url)
                .bearer_auth(&token)
                .header(RANGE, format!("bytes={offset}-{end}"))
                .send()?;
            let mut response = check_status(response, &format!("content of {}", file.id))?;

            if response.status().as_u16() == 200 {
                if offset > 0 {
                    return Err(ProxyError::Remote(
                        "download endpoint stopped honouring byte ranges".to_string(),
                    ));
                }
                let copied = io::copy(&mut response, writer)?;
                progress(copied, copied.max(total));
                return Ok(copied);
            }

            let copied = io::copy(&mut response.take(end - offset + 1), writer)?;
            if copied == 0 {
                return Err(ProxyError::Remote(format!(
                    "download of {} ended early at byte {offset}",
                    file.id
                )));
            }
            offset += copied;
            progress(offset, total);
            tracing::trace!(file_id = %file.id, offset, total, "downloaded chunk");
        }
        writer.flush()?;
        Ok(offset)
    }
}
