/// 聊天协议帧定义

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::errors::{Error, Result};

/// 查询模式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// 自然语言对话
    #[default]
    Chat,
    /// 直接 SQL 查询
    Sql,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Sql => "sql",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "sql" => Ok(Self::Sql),
            other => Err(Error::InvalidArgument(format!("未知查询模式: {}", other))),
        }
    }
}

/// 服务端推送帧
///
/// 所有字段均可缺省，帧的分类由 `type` 字段决定。
/// 字段类型不符（如 `"node": 42`）时按缺省处理，不影响整帧解析。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundFrame {
    /// 帧类型（thought / status / 其他）
    pub frame_type: Option<String>,

    /// 产生该帧的节点
    pub node: Option<String>,

    /// 帧内容，通常是字符串
    pub content: Option<Value>,
}

impl InboundFrame {
    /// 从 JSON 字符串解析
    ///
    /// 只接受 JSON 对象，数字、字符串字面量、数组等一律视为解析失败
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::InvalidArgument("帧不是 JSON 对象".to_string()))?;

        let text_field = |name: &str| object.get(name).and_then(Value::as_str).map(str::to_string);
        Ok(Self {
            frame_type: text_field("type"),
            node: text_field("node"),
            content: object.get("content").cloned(),
        })
    }

    /// 内容的文本形式
    ///
    /// 字符串原样返回，其他 JSON 值返回其序列化文本，缺省时返回空串
    pub fn content_text(&self) -> String {
        match &self.content {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// 内容是否为字符串
    pub fn has_text_content(&self) -> bool {
        matches!(self.content, Some(Value::String(_)))
    }
}

/// 客户端发送信封，每次发送新建
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundEnvelope {
    pub content: String,
    pub mode: QueryMode,
    pub session_id: String,
}

impl OutboundEnvelope {
    pub fn new(content: impl Into<String>, mode: QueryMode, session_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            mode,
            session_id: session_id.into(),
        }
    }

    /// 序列化为 JSON 字符串
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
