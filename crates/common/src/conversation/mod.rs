/// 会话模块
/// 
/// 会话记录、智能体活动状态，以及把服务端帧转换为会话事件的分发器

pub mod activity;
pub mod dispatcher;
pub mod transcript;

pub use activity::{AgentActivity, NextStep};
pub use dispatcher::{decode_frame, Conversation, ConversationEvent, ConversationSnapshot, FrameEvent};
pub use transcript::{Attachment, EntryKind, Role, Transcript, TranscriptEntry};
