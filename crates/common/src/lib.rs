/// Data Intelligence Platform - 公共库
/// 
/// 提供聊天协议的帧类型、会话记录与协议分发逻辑，供客户端与其他前端共享

pub mod conversation;
pub mod errors;
pub mod protocol;

// 重新导出常用类型
pub use conversation::{
    AgentActivity, Attachment, Conversation, ConversationEvent, ConversationSnapshot, EntryKind, Role,
    TranscriptEntry,
};
pub use errors::{Error, Result};
pub use protocol::{InboundFrame, OutboundEnvelope, QueryMode};
