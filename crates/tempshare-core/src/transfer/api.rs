//! 会话 HTTP 接口客户端
//!
//! 接口:
//! - `GET /files`: 完整文件列表
//! - `POST /upload`: multipart 上传（字段 `file`）
//! - `GET /remove/{filename}`: 删除文件
//! - `GET /download/{filename}`: 下载文件
//! - `GET /get-qr` / `GET /get-url`: 分享二维码和链接
//!
//! 所有 GET 请求经过可选的 [`OfflineCacheGuard`]，会话接口由其旁路直达网络。

use log::{debug, info};

use crate::cache::OfflineCacheGuard;
use crate::config::ClientSettings;
use crate::transfer::fetch::{Fetcher, HttpFetcher, HttpResponse};
use crate::view::SessionSnapshot;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

/// 会话接口错误
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned status {status}")]
    Status {
        status: u16,
        message: Option<String>,
    },

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// 服务端给出的错误描述
    pub fn server_message(&self) -> Option<&str> {
        match self {
            SessionError::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// 面向用户的提示文本，服务端没有给出描述时使用 `fallback`
    pub fn user_message(&self, fallback: &str) -> String {
        self.server_message().unwrap_or(fallback).to_string()
    }
}

/// 待上传的文件
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        let mime_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();
        Self {
            filename,
            mime_type,
            bytes,
        }
    }

    /// 从本地文件读取
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
            })?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(filename, bytes))
    }
}

/// 上传成功的响应
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

/// 同步控制器依赖的会话接口
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// 获取完整文件列表
    async fn list_files(&self) -> Result<SessionSnapshot, SessionError>;

    /// 上传文件
    async fn upload(&self, file: UploadFile) -> Result<UploadReceipt, SessionError>;

    /// 删除文件
    async fn remove(&self, filename: &str) -> Result<(), SessionError>;
}

#[async_trait]
impl<T: SessionApi + ?Sized> SessionApi for Arc<T> {
    async fn list_files(&self) -> Result<SessionSnapshot, SessionError> {
        (**self).list_files().await
    }

    async fn upload(&self, file: UploadFile) -> Result<UploadReceipt, SessionError> {
        (**self).upload(file).await
    }

    async fn remove(&self, filename: &str) -> Result<(), SessionError> {
        (**self).remove(filename).await
    }
}

/// 会话服务器 HTTP 客户端
pub struct HttpSessionClient {
    base: Url,
    http: reqwest::Client,
    network: HttpFetcher,
    guard: Option<Arc<OfflineCacheGuard>>,
}

impl HttpSessionClient {
    pub fn new(base: Url, settings: &ClientSettings) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .build()?;

        Ok(Self {
            base,
            network: HttpFetcher::new(http.clone()),
            http,
            guard: None,
        })
    }

    /// 使用设置中的服务器地址创建
    pub fn from_settings(settings: &ClientSettings) -> Result<Self, SessionError> {
        let base = Url::parse(&settings.server_url)?;
        Self::new(base, settings)
    }

    /// 让 GET 请求经过离线缓存
    pub fn with_guard(mut self, guard: Arc<OfflineCacheGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// 直连网络的读取器（供离线缓存使用）
    pub fn network(&self) -> HttpFetcher {
        self.network.clone()
    }

    /// 以路径段拼接 URL，文件名中的特殊字符会被转义
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SessionError> {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: &Url) -> Result<HttpResponse, SessionError> {
        let response = match &self.guard {
            Some(guard) => guard.serve(url).await?,
            None => self.network.get(url).await?,
        };
        response.into_result()
    }

    /// 文件下载地址
    pub fn download_url(&self, filename: &str) -> Result<Url, SessionError> {
        self.endpoint(&["download", filename])
    }

    /// 获取会话分享链接
    pub async fn share_url(&self) -> Result<String, SessionError> {
        #[derive(Deserialize)]
        struct UrlBody {
            url: String,
        }
        let url = self.endpoint(&["get-url"])?;
        let body: UrlBody = self.get(&url).await?.json()?;
        Ok(body.url)
    }

    /// 获取分享二维码（PNG）
    pub async fn qr_code(&self) -> Result<Vec<u8>, SessionError> {
        let url = self.endpoint(&["get-qr"])?;
        Ok(self.get(&url).await?.body)
    }

    /// 下载文件到指定目录，返回保存路径
    pub async fn download(&self, filename: &str, dir: &Path) -> Result<PathBuf, SessionError> {
        let url = self.download_url(filename)?;
        info!("Downloading file from: {}", url);

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            let failed = HttpFetcher::read(response).await?;
            return Err(SessionError::Status {
                status: failed.status,
                message: failed.error_message(),
            });
        }

        // 只取最后一段，避免写出目标目录
        let local_name = Path::new(filename)
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid file name")
            })?;
        tokio::fs::create_dir_all(dir).await?;
        let path = available_path(dir, Path::new(&local_name)).await?;

        // 先写入临时文件，完成后再移到目标位置
        let mut partial_name = std::ffi::OsString::from(".");
        partial_name.push(path.file_name().unwrap_or(local_name.as_os_str()));
        partial_name.push(".part");
        let partial = dir.join(partial_name);

        let written = match write_stream(&partial, response).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        debug!("Saved {} bytes to {:?}", written, path);
        Ok(path)
    }
}

async fn write_stream(path: &Path, response: reqwest::Response) -> Result<u64, SessionError> {
    let mut output = File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        output.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    output.flush().await?;
    Ok(written)
}

/// 目标已存在时改用 `name (1).ext`、`name (2).ext` ...
async fn available_path(dir: &Path, name: &Path) -> std::io::Result<PathBuf> {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = name.extension().map(|e| e.to_string_lossy().to_string());
    let mut counter = 1u32;
    loop {
        let numbered = match &extension {
            Some(ext) => format!("{} ({}).{}", stem, counter, ext),
            None => format!("{} ({})", stem, counter),
        };
        let candidate = dir.join(numbered);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

#[async_trait]
impl SessionApi for HttpSessionClient {
    async fn list_files(&self) -> Result<SessionSnapshot, SessionError> {
        let url = self.endpoint(&["files"])?;
        self.get(&url).await?.json()
    }

    async fn upload(&self, file: UploadFile) -> Result<UploadReceipt, SessionError> {
        let url = self.endpoint(&["upload"])?;
        debug!("Uploading {} ({} bytes)", file.filename, file.bytes.len());

        let part = reqwest::multipart::Part::bytes(file.bytes)
            .file_name(file.filename)
            .mime_str(&file.mime_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self.http.post(url).multipart(form).send().await?;
        let response = HttpFetcher::read(response).await?.into_result()?;

        // 成功时响应体可能为空对象
        Ok(serde_json::from_slice(&response.body).unwrap_or_default())
    }

    async fn remove(&self, filename: &str) -> Result<(), SessionError> {
        let url = self.endpoint(&["remove", filename])?;
        self.get(&url).await?;
        Ok(())
    }
}
