use super::{
    models::{AboutInfo, FileInfo, ModifiedDateMode, FOLDER_MIME_TYPE},
    ProgressFn, RemoteFileService,
};
use crate::config::DriveConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::recover_lock;
use crate::stream::CancelToken;
use chrono::{DateTime, Utc};
use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    redirect::Policy,
};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};
use url::Url;

/// 优先于凭据文件读取的环境变量
pub const ACCESS_TOKEN_ENV: &str = "DRIVE_PROXY_ACCESS_TOKEN";

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_ANCESTRY_DEPTH: usize = 64;

/// 基于 blocking reqwest 的 Google Drive v2 客户端。
///
/// 不负责获取令牌：bearer token 从环境变量或凭据文件读取。
pub struct DriveClient {
    pub(super) api_base: String,
    pub(super) upload_base: String,
    cache_root: PathBuf,
    credentials_file: Option<PathBuf>,
    pub(super) http: Client,
    pub(super) transfer_http: Client,
    pub(super) upload_http: Client,
    root_id: Mutex<Option<String>>,
    ancestry: Mutex<HashMap<String, Ancestry>>,
}

/// 校验配置的基础地址（仅允许 http/https），并去掉末尾的 `/`
fn endpoint(setting: &str, value: &str) -> ProxyResult<String> {
    let parsed = Url::parse(value.trim())
        .map_err(|e| ProxyError::Config(format!("{setting} {value:?} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ProxyError::Config(format!(
            "{setting} must be an http(s) URL, got {value:?}"
        )));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// 已见过的文件夹标题与父目录，拼本地路径时免去逐级请求
#[derive(Clone, Debug)]
struct Ancestry {
    title: String,
    parent_id: Option<String>,
    parent_is_root: bool,
}

impl DriveClient {
    pub fn new(config: &DriveConfig) -> ProxyResult<Self> {
        Ok(Self {
            api_base: endpoint("drive.api_base", &config.api_base)?,
            upload_base: endpoint("drive.upload_base", &config.upload_base)?,
            cache_root: config.cache_root.clone(),
            credentials_file: config.credentials_file.clone(),
            http: build_blocking_client(METADATA_TIMEOUT, Policy::limited(10))?,
            transfer_http: build_blocking_client(TRANSFER_TIMEOUT, Policy::limited(10))?,
            // 上传端点的 308 表示“续传未完成”，不是重定向
            upload_http: build_blocking_client(TRANSFER_TIMEOUT, Policy::none())?,
            root_id: Mutex::new(None),
            ancestry: Mutex::new(HashMap::new()),
        })
    }

    pub(super) fn access_token(&self) -> ProxyResult<String> {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }
        if let Some(path) = &self.credentials_file {
            let token = fs::read_to_string(path).map_err(|e| {
                ProxyError::Unauthenticated(format!(
                    "failed to read credentials file {}: {e}",
                    path.display()
                ))
            })?;
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }
        Err(ProxyError::Unauthenticated(format!(
            "no access token available; set {ACCESS_TOKEN_ENV} or drive.credentials_file"
        )))
    }

    pub(super) fn authorized(&self, builder: RequestBuilder) -> ProxyResult<RequestBuilder> {
        Ok(builder
            .bearer_auth(self.access_token()?)
            .header("Accept", "application/json"))
    }

    pub(super) fn files_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.api_base, encode_segment(file_id))
    }

    pub(super) fn fetch_file_dto(&self, file_id: &str) -> ProxyResult<FileDto> {
        if file_id.trim().is_empty() {
            return Err(ProxyError::invalid_argument("file id is required"));
        }
        let request = self.authorized(self.http.get(self.files_url(file_id)))?;
        let response = check_status(request.send()?, &format!("file {file_id}"))?;
        Ok(response.json::<FileDto>()?)
    }

    pub(super) fn root_folder_id(&self) -> ProxyResult<String> {
        if let Some(id) = recover_lock(&self.root_id).clone() {
            return Ok(id);
        }
        let about = self.fetch_about()?;
        *recover_lock(&self.root_id) = Some(about.root_folder_id.clone());
        Ok(about.root_folder_id)
    }

    pub(super) fn remember_root(&self, root_id: &str) {
        *recover_lock(&self.root_id) = Some(root_id.to_string());
    }

    /// 转换接口返回的记录，并缓存其祖先信息供后续拼路径
    pub(super) fn file_info(&self, dto: FileDto) -> ProxyResult<FileInfo> {
        let root_id = self.root_folder_id()?;
        let parent = dto.parents.as_ref().and_then(|parents| parents.first());
        let parent_id = parent.map(|p| p.id.clone());
        let parent_is_root = parent
            .map(|p| p.is_root.unwrap_or(false) || p.id == root_id)
            .unwrap_or(false);
        let title = dto.title.clone().unwrap_or_default();
        let is_root = dto.id == root_id;
        let mime_type = dto.mime_type.clone().unwrap_or_default();

        if !is_root {
            recover_lock(&self.ancestry).insert(
                dto.id.clone(),
                Ancestry {
                    title: title.clone(),
                    parent_id: parent_id.clone(),
                    parent_is_root,
                },
            );
        }

        let file_path = if is_root {
            Some(self.cache_root.clone())
        } else {
            self.local_path(&title, parent_id.as_deref(), parent_is_root, &root_id)
        };

        Ok(FileInfo {
            is_folder: mime_type == FOLDER_MIME_TYPE,
            id: dto.id,
            title,
            mime_type,
            is_root,
            parent_id,
            file_path,
            modified_date: dto.modified_date.as_deref().and_then(parse_timestamp),
            file_size: dto
                .file_size
                .as_deref()
                .and_then(|size| size.parse::<u64>().ok())
                .unwrap_or(0),
            download_url: dto.download_url,
            alternate_link: dto.alternate_link,
            trashed: dto.labels.and_then(|l| l.trashed).unwrap_or(false),
            md5_checksum: dto.md5_checksum,
        })
    }

    fn local_path(
        &self,
        title: &str,
        parent_id: Option<&str>,
        parent_is_root: bool,
        root_id: &str,
    ) -> Option<PathBuf> {
        let mut segments = vec![sanitize_title(title)];
        let mut next = if parent_is_root {
            None
        } else {
            parent_id.map(str::to_string)
        };
        let mut depth = 0;
        while let Some(id) = next {
            if id == root_id {
                break;
            }
            depth += 1;
            if depth > MAX_ANCESTRY_DEPTH {
                tracing::warn!(file_id = %id, "ancestry too deep; local path unavailable");
                return None;
            }
            let known = recover_lock(&self.ancestry).get(&id).cloned();
            let ancestry = match known {
                Some(ancestry) => ancestry,
                None => match self.fetch_ancestry(&id, root_id) {
                    Ok(ancestry) => ancestry,
                    Err(err) => {
                        tracing::warn!(file_id = %id, error = %err, "failed to resolve ancestor");
                        return None;
                    }
                },
            };
            segments.push(sanitize_title(&ancestry.title));
            next = if ancestry.parent_is_root {
                None
            } else {
                ancestry.parent_id
            };
        }
        let mut path = self.cache_root.clone();
        for segment in segments.iter().rev() {
            path.push(segment);
        }
        Some(path)
    }

    fn fetch_ancestry(&self, file_id: &str, root_id: &str) -> ProxyResult<Ancestry> {
        let dto = self.fetch_file_dto(file_id)?;
        let parent = dto.parents.as_ref().and_then(|parents| parents.first());
        let ancestry = Ancestry {
            title: dto.title.clone().unwrap_or_default(),
            parent_id: parent.map(|p| p.id.clone()),
            parent_is_root: parent
                .map(|p| p.is_root.unwrap_or(false) || p.id == root_id)
                .unwrap_or(false),
        };
        recover_lock(&self.ancestry).insert(file_id.to_string(), ancestry.clone());
        Ok(ancestry)
    }

    pub(super) fn forget(&self, file_id: &str) {
        recover_lock(&self.ancestry).remove(file_id);
    }
}

impl RemoteFileService for DriveClient {
    fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    fn get_file(&self, file_id: &str) -> ProxyResult<FileInfo> {
        let dto = self.fetch_file_dto(file_id)?;
        self.file_info(dto)
    }

    fn get_children(&self, parent_id: &str) -> ProxyResult<Vec<FileInfo>> {
        self.list_children(parent_id)
    }

    fn get_about(&self) -> ProxyResult<AboutInfo> {
        let about = self.fetch_about()?;
        self.remember_root(&about.root_folder_id);
        Ok(about)
    }

    fn download(
        &self,
        file: &FileInfo,
        writer: &mut dyn Write,
        chunk_size: u64,
        cancel: &CancelToken,
        progress: &mut ProgressFn<'_>,
    ) -> ProxyResult<u64> {
        self.download_content(file, writer, chunk_size, cancel, progress)
    }

    fn upload(
        &self,
        file_id: &str,
        reader: &mut dyn Read,
        length: u64,
        chunk_size: u64,
        cancel: &CancelToken,
        progress: &mut ProgressFn<'_>,
    ) -> ProxyResult<FileInfo> {
        self.upload_content(file_id, reader, length, chunk_size, cancel, progress)
    }

    fn insert(&self, parent_id: &str, title: &str, mime_type: &str) -> ProxyResult<FileInfo> {
        self.insert_file(parent_id, title, mime_type)
    }

    fn copy(&self, file_id: &str, parent_id: &str) -> ProxyResult<FileInfo> {
        self.copy_file(file_id, parent_id)
    }

    fn move_file(&self, file_id: &str, parent_id: &str) -> ProxyResult<FileInfo> {
        self.reparent_file(file_id, parent_id)
    }

    fn rename(&self, file_id: &str, title: &str) -> ProxyResult<FileInfo> {
        self.rename_file(file_id, title)
    }

    fn trash(&self, file_id: &str) -> ProxyResult<FileInfo> {
        self.post_label_change(file_id, "trash")
    }

    fn untrash(&self, file_id: &str) -> ProxyResult<FileInfo> {
        self.post_label_change(file_id, "untrash")
    }

    fn set_modified_date(
        &self,
        file_id: &str,
        modified: DateTime<Utc>,
        mode: ModifiedDateMode,
    ) -> ProxyResult<FileInfo> {
        self.write_modified_date(file_id, modified, mode)
    }
}

/// 构建带统一超时与重定向策略的阻塞 HTTP 客户端
pub(super) fn build_blocking_client(timeout: Duration, redirect: Policy) -> ProxyResult<Client> {
    Ok(Client::builder().timeout(timeout).redirect(redirect).build()?)
}

/// 把 Drive 的 HTTP 错误映射为 `ProxyError`，保留响应体摘要
pub(super) fn check_status(response: Response, subject: &str) -> ProxyResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 401 {
        return Err(ProxyError::Unauthenticated(
            "access token rejected by Drive API".to_string(),
        ));
    }
    if status.as_u16() == 404 {
        return Err(ProxyError::NotFound(subject.to_string()));
    }
    let body = response.text().unwrap_or_default();
    let message: String = body.chars().take(256).collect();
    Err(ProxyError::Http {
        status: status.as_u16(),
        message: format!("{subject}: {message}"),
    })
}

pub(super) fn encode_segment(raw: &str) -> String {
    percent_encoding::utf8_percent_encode(raw, percent_encoding::NON_ALPHANUMERIC).to_string()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

/// 替换本地文件名中不允许出现的字符
pub(crate) fn sanitize_title(raw: &str) -> String {
    let fallback = "Untitled";
    let sanitized: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();
    let final_name = sanitized.trim();
    if final_name.is_empty() || final_name == "." || final_name == ".." {
        fallback.to_string()
    } else {
        final_name.to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FileDto {
    pub(super) id: String,
    pub(super) title: Option<String>,
    pub(super) mime_type: Option<String>,
    pub(super) parents: Option<Vec<ParentDto>>,
    pub(super) modified_date: Option<String>,
    pub(super) file_size: Option<String>,
    pub(super) download_url: Option<String>,
    pub(super) alternate_link: Option<String>,
    pub(super) labels: Option<LabelsDto>,
    pub(super) md5_checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ParentDto {
    pub(super) id: String,
    pub(super) is_root: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LabelsDto {
    pub(super) trashed: Option<bool>,
}
