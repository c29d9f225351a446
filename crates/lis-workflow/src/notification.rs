//! 结果通知
//!
//! 危急值与结果发布通知。通知发送是尽力而为的：失败只记录日志，
//! 不重试，也不影响已经完成的工作流操作。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lis_core::{LisError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "result.critical")]
    CriticalResult,
    #[serde(rename = "result.reported")]
    ResultReported,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CriticalResult => "result.critical",
            Self::ResultReported => "result.reported",
        }
    }
}

/// 一条待发送的通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub recipient: String,
    /// 模板数据
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, recipient: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            recipient: recipient.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

/// 通知发送器
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> Result<()>;
}

/// 只写日志的发送器，用于本地运行和未配置Webhook时
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        info!(
            "Notification {} [{}] for {}: {}",
            notification.id,
            notification.kind.as_str(),
            notification.recipient,
            notification.data
        );
        Ok(())
    }
}

/// HTTP Webhook发送器
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    url: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LisError::Config(format!("无法创建HTTP客户端: {}", e)))?;

        Ok(Self {
            url: url.into(),
            secret,
            client,
        })
    }

    /// 生成签名
    pub fn generate_signature(&self, payload: &str) -> Option<String> {
        use sha2::{Digest, Sha256};

        self.secret.as_ref().map(|secret| {
            let mut hasher = Sha256::new();
            hasher.update(payload);
            hasher.update(secret);
            format!("sha256={:x}", hasher.finalize())
        })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        let payload = serde_json::to_string(notification)?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "LIS-Webhook/1.0")
            .header("X-LIS-Event", notification.kind.as_str());

        if let Some(signature) = self.generate_signature(&payload) {
            request = request.header("X-LIS-Signature", signature);
        }

        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|e| LisError::Notification(format!("{}: {}", self.url, e)))?;

        if response.status().is_success() {
            info!("Delivered notification {} to {}", notification.id, self.url);
            Ok(())
        } else {
            let status = response.status();
            error!("Webhook failed with status {}: {}", status, self.url);
            Err(LisError::Notification(format!(
                "webhook returned status {}",
                status
            )))
        }
    }
}

/// 尽力发送，返回是否成功
pub async fn dispatch_best_effort(
    dispatcher: &dyn NotificationDispatcher,
    notification: &Notification,
) -> bool {
    match dispatcher.dispatch(notification).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Failed to send {} notification {} to {}: {}",
                notification.kind.as_str(),
                notification.id,
                notification.recipient,
                e
            );
            false
        }
    }
}
