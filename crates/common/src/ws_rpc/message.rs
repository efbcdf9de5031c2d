/// Agent 桥接消息信封

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{RpcError, RpcErrorCode};

/// 消息类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// 请求消息（期望响应）
    Request,
    /// 响应消息
    Response,
    /// 通知消息（不需要响应）
    Notification,
}

/// RPC 消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    /// 消息唯一ID（响应沿用请求的ID）
    pub id: String,

    /// 消息类型
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// 方法名（request/notification 时必需）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// 消息负载
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// 错误信息（仅 response 时可能有值）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorInfo>,
}

/// RPC 错误信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorInfo {
    pub code: String,
    pub message: String,
}

impl RpcMessage {
    /// 创建请求消息
    pub fn request(method: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: format!("req-{}", Uuid::new_v4()),
            message_type: MessageType::Request,
            method: Some(method.into()),
            payload: Some(payload),
            error: None,
        }
    }

    /// 创建响应消息
    pub fn response(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            message_type: MessageType::Response,
            method: None,
            payload: Some(payload),
            error: None,
        }
    }

    /// 创建错误响应消息
    pub fn error_response(id: impl Into<String>, error: &RpcError) -> Self {
        Self {
            id: id.into(),
            message_type: MessageType::Response,
            method: None,
            payload: None,
            error: Some(RpcErrorInfo {
                code: error.code.as_str().to_string(),
                message: error.message.clone(),
            }),
        }
    }

    /// 创建通知消息
    pub fn notification(method: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: format!("notif-{}", Uuid::new_v4()),
            message_type: MessageType::Notification,
            method: Some(method.into()),
            payload: Some(payload),
            error: None,
        }
    }

    /// 用可序列化的负载创建通知消息
    pub fn notify_with<T: Serialize>(method: impl Into<String>, payload: &T) -> Result<Self, RpcError> {
        Ok(Self::notification(method, serde_json::to_value(payload)?))
    }

    /// 将负载解析为指定类型
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        let payload = self
            .payload
            .clone()
            .ok_or_else(|| RpcError::invalid_params("缺少消息负载"))?;
        serde_json::from_value(payload).map_err(|e| {
            RpcError::new(RpcErrorCode::InvalidParams, format!("解析消息负载失败: {}", e))
        })
    }

    /// 序列化为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 从 JSON 字符串反序列化
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 判断是否是成功响应
    pub fn is_success(&self) -> bool {
        self.message_type == MessageType::Response && self.error.is_none()
    }

    /// 判断是否是错误响应
    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Response && self.error.is_some()
    }
}
