use super::{
    client::{check_status, DriveClient, FileDto},
    models::{FileInfo, ModifiedDateMode},
};
use crate::error::{ProxyError, ProxyResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

impl DriveClient {
    pub(super) fn insert_file(
        &self,
        parent_id: &str,
        title: &str,
        mime_type: &str,
    ) -> ProxyResult<FileInfo> {
        if parent_id.trim().is_empty() {
            return Err(ProxyError::invalid_argument("parent id is required"));
        }
        if title.trim().is_empty() {
            return Err(ProxyError::invalid_argument("title is required"));
        }
        let body = FileResource {
            title: Some(title.to_string()),
            mime_type: Some(mime_type.to_string()),
            parents: Some(vec![ParentRef {
                id: parent_id.to_string(),
            }]),
            ..FileResource::default()
        };
        let url = format!("{}/files", self.api_base);
        let request = self.authorized(self.http.post(url).json(&body))?;
        let response = check_status(request.send()?, &format!("insert into {parent_id}"))?;
        self.file_info(response.json::<FileDto>()?)
    }

    pub(super) fn copy_file(&self, file_id: &str, parent_id: &str) -> ProxyResult<FileInfo> {
        let source = self.fetch_file_dto(file_id)?;
        let body = FileResource {
            title: source.title,
            parents: Some(vec![ParentRef {
                id: parent_id.to_string(),
            }]),
            ..FileResource::default()
        };
        let url = format!("{}/copy", self.files_url(file_id));
        let request = self.authorized(self.http.post(url).json(&body))?;
        let response = check_status(request.send()?, &format!("copy of {file_id}"))?;
        self.file_info(response.json::<FileDto>()?)
    }

    /// 通过替换父目录实现移动：加入目标，移除现有的全部父目录
    pub(super) fn reparent_file(&self, file_id: &str, parent_id: &str) -> ProxyResult<FileInfo> {
        let current = self.fetch_file_dto(file_id)?;
        let previous = current
            .parents
            .unwrap_or_default()
            .into_iter()
            .map(|parent| parent.id)
            .filter(|id| id != parent_id)
            .collect::<Vec<_>>()
            .join(",");
        let mut params = vec![("addParents", parent_id.to_string())];
        if !previous.is_empty() {
            params.push(("removeParents", previous));
        }
        self.forget(file_id);
        let request = self.authorized(
            self.http
                .patch(self.files_url(file_id))
                .query(&params)
                .json(&FileResource::default()),
        )?;
        let response = check_status(request.send()?, &format!("move of {file_id}"))?;
        self.file_info(response.json::<FileDto>()?)
    }

    pub(super) fn rename_file(&self, file_id: &str, title: &str) -> ProxyResult<FileInfo> {
        let body = FileResource {
            title: Some(title.to_string()),
            ..FileResource::default()
        };
        self.forget(file_id);
        let request = self.authorized(self.http.patch(self.files_url(file_id)).json(&body))?;
        let response = check_status(request.send()?, &format!("rename of {file_id}"))?;
        self.file_info(response.json::<FileDto>()?)
    }

    /// `action` 为 `trash` 或 `untrash`
    pub(super) fn post_label_change(&self, file_id: &str, action: &str) -> ProxyResult<FileInfo> {
        let url = format!("{}/{action}", self.files_url(file_id));
        let request = self.authorized(self.http.post(url))?;
        let response = check_status(request.send()?, &format!("{action} of {file_id}"))?;
        self.file_info(response.json::<FileDto>()?)
    }

    pub(super) fn write_modified_date(
        &self,
        file_id: &str,
        modified: DateTime<Utc>,
        mode: ModifiedDateMode,
    ) -> ProxyResult<FileInfo> {
        let body = FileResource {
            modified_date: Some(modified.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ..FileResource::default()
        };
        let url = self.files_url(file_id);
        let builder = match mode {
            ModifiedDateMode::Update => self.http.put(url),
            ModifiedDateMode::Patch => self.http.patch(url),
        };
        let request = self.authorized(
            builder
                .query(&[("setModifiedDate", "true"), ("updateViewedDate", "false")])
                .json(&body),
        )?;
        let response = check_status(request.send()?, &format!("modified date of {file_id}"))?;
        self.file_info(response.json::<FileDto>()?)
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parents: Option<Vec<ParentRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified_date: Option<String>,
}

#[derive(Debug, Serialize)]
struct ParentRef {
    id: String,
}
