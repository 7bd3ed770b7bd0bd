/// WebSocket 消息编解码辅助函数

use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::OutboundEnvelope;
use crate::errors::Result;

/// 解码后的 WebSocket 消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// 需要交给分发器的帧文本
    Frame(String),
    /// 对端发起的关闭握手
    Close,
    /// 控制帧，无需处理
    Control,
}

/// 编码发送信封为 WebSocket 消息
pub fn encode(envelope: &OutboundEnvelope) -> Result<WsMessage> {
    Ok(WsMessage::Text(envelope.to_json()?))
}

/// 解码 WebSocket 消息
///
/// 二进制帧按 UTF-8 宽松解码，非法字节替换后照常分发
pub fn decode(ws_msg: WsMessage) -> Incoming {
    match ws_msg {
        WsMessage::Text(text) => Incoming::Frame(text),
        WsMessage::Binary(data) => Incoming::Frame(String::from_utf8_lossy(&data).into_owned()),
        WsMessage::Close(_) => Incoming::Close,
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Incoming::Control,
    }
}
