use super::{
    client::{check_status, encode_segment, DriveClient, FileDto},
    models::FileInfo,
    ProgressFn,
};
use crate::error::{ProxyError, ProxyResult};
use crate::stream::CancelToken;
use reqwest::header::{CONTENT_RANGE, LOCATION};
use std::io::Read;

const RESUME_INCOMPLETE: u16 = 308;

impl DriveClient {
    /// 可续传上传：先建立会话，再按 `Content-Range` 分块发送，
    /// 直到端点返回最终的文件资源。
    pub(super) fn upload_content(
        &self,
        file_id: &str,
        reader: &mut dyn Read,
        length: u64,
        chunk_size: u64,
        cancel: &CancelToken,
        progress: &mut ProgressFn<'_>,
    ) -> ProxyResult<FileInfo> {
        let session_url = self.open_upload_session(file_id, length)?;
        let token = self.access_token()?;
        let mut buffer = vec![0u8; chunk_size.clamp(1, length.max(1)) as usize];
        let mut sent = 0u64;

        loop {
            cancel.check()?;
            let want = (length - sent).min(buffer.len() as u64) as usize;
            let filled = read_full(reader, &mut buffer[..want])?;
            if filled < want {
                return Err(ProxyError::invalid_state(format!(
                    "local file shrank during upload ({} of {length} bytes)",
                    sent + filled as u64
                )));
            }
            let range = if length == 0 {
                "bytes */0".to_string()
            } else {
                format!("bytes {}-{}/{length}", sent, sent + filled as u64 - 1)
            };
            let response = self
                .upload_http
                .put(&session_url)
                .bearer_auth(&token)
                .header(CONTENT_RANGE, range)
                .body(buffer[..filled].to_vec())
                .send()?;

            if response.status().as_u16() == RESUME_INCOMPLETE {
                sent += filled as u64;
                progress(sent, length);
                if sent >= length {
                    return Err(ProxyError::Remote(
                        "upload endpoint expects more bytes than the file holds".to_string(),
                    ));
                }
                continue;
            }

            let response = check_status(response, &format!("upload of {file_id}"))?;
            sent += filled as u64;
            progress(sent, length);
            let dto: FileDto = response.json()?;
            tracing::debug!(file_id, bytes = sent, "upload finished");
            return self.file_info(dto);
        }
    }

    fn open_upload_session(&self, file_id: &str, length: u64) -> ProxyResult<String> {
        let url = format!("{}/files/{}", self.upload_base, encode_segment(file_id));
        let request = self.authorized(
            self.upload_http
                .put(url)
                .query(&[("uploadType", "resumable")])
                .header("X-Upload-Content-Length", length.to_string())
                .json(&serde_json::json!({})),
        )?;
        let response = check_status(request.send()?, &format!("upload session for {file_id}"))?;
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ProxyError::Remote("upload session has no Location header".to_string()))
    }
}

/// 读满 `buf` 或读到末尾为止
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
