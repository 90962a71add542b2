use super::{
    client::{check_status, DriveClient, FileDto},
    models::{AboutInfo, FileInfo},
};
use crate::error::{ProxyError, ProxyResult};
use serde::Deserialize;

/// Drive v2 的 files.list 单页最多 1000 条
const PAGE_SIZE: &str = "1000";

impl DriveClient {
    /// 列出 `parent_id` 下未删除的子项，自动翻页
    pub(super) fn list_children(&self, parent_id: &str) -> ProxyResult<Vec<FileInfo>> {
        if parent_id.trim().is_empty() {
            return Err(ProxyError::invalid_argument("parent id is required"));
        }
        let query = format!(
            "'{}' in parents and trashed = false",
            parent_id.replace('\'', "\\'")
        );
        let url = format!("{}/files", self.api_base);

        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![("q", query.clone()), ("maxResults", PAGE_SIZE.to_string())];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let request = self.authorized(self.http.get(&url).query(&params))?;
            let response = check_status(request.send()?, &format!("children of {parent_id}"))?;
            let payload: FileListDto = response.json()?;
            for dto in payload.items {
                items.push(self.file_info(dto)?);
            }
            match payload.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        tracing::debug!(parent_id, count = items.len(), "listed drive children");
        Ok(items)
    }

    pub(super) fn fetch_about(&self) -> ProxyResult<AboutInfo> {
        let url = format!("{}/about", self.api_base);
        let request = self.authorized(self.http.get(url))?;
        let response = check_status(request.send()?, "about")?;
        let payload: AboutDto = response.json()?;
        Ok(AboutInfo {
            name: payload.name.unwrap_or_default(),
            user: payload
                .user
                .and_then(|user| user.email_address.or(user.display_name)),
            quota_total: payload.quota_bytes_total.and_then(|v| v.parse().ok()),
            quota_used: payload.quota_bytes_used.and_then(|v| v.parse().ok()),
            root_folder_id: payload.root_folder_id,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListDto {
    #[serde(default)]
    items: Vec<FileDto>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutDto {
    name: Option<String>,
    user: Option<UserDto>,
    quota_bytes_total: Option<String>,
    quota_bytes_used: Option<String>,
    root_folder_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDto {
    display_name: Option<String>,
    email_address: Option<String>,
}
