//! 网络读取层
//!
//! [`Fetcher`] 是离线缓存和会话客户端共用的 GET 接口，
//! 响应体被完整读入内存（静态资源和 JSON 接口都很小）。

use crate::transfer::api::SessionError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

/// 已完整读取的 HTTP 响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 解析 JSON 响应体
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// 服务端在 `{ "error": "..." }` 中给出的错误描述
    pub fn error_message(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct ErrorBody {
            error: String,
        }
        serde_json::from_slice::<ErrorBody>(&self.body)
            .ok()
            .map(|b| b.error)
    }

    /// 非 2xx 状态转换为 [`SessionError::Status`]
    pub fn into_result(self) -> Result<Self, SessionError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SessionError::Status {
                status: self.status,
                message: self.error_message(),
            })
        }
    }
}

/// GET 请求接口
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &Url) -> Result<HttpResponse, SessionError>;
}

/// 基于 reqwest 的网络实现
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// 读取完整响应
    pub async fn read(response: reqwest::Response) -> Result<HttpResponse, SessionError> {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse::new(status, content_type, body))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &Url) -> Result<HttpResponse, SessionError> {
        let response = self.client.get(url.clone()).send().await?;
        Self::read(response).await
    }
}
