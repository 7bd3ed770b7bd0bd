/// 协议分发器
/// 
/// 两阶段解码：先解析外层帧，再对内容文本做内嵌结果探测。
/// 任何解析失败都退化为纯文本条目，不会向调用方返回错误。

use tracing::debug;

use super::activity::{self, AgentActivity, NextStep, SYSTEM_NODE};
use super::transcript::{Transcript, TranscriptEntry, SEND_FAILURE_TEXT};
use crate::protocol::{probe_embedded, EmbeddedResult, InboundFrame};

/// 执行错误会清空活动状态的节点
const EXECUTOR_NODE: &str = "sql_executor";

/// 执行错误的标记文字
const EXECUTOR_ERROR_MARKER: &str = "Error";

/// 解码后的帧
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// 节点思考过程
    Thought { node: String, text: String },
    /// 流程进度
    Status(NextStep),
    /// 内容帧，`embedded` 为文本中探测到的结构化结果
    Content {
        node: Option<String>,
        text: String,
        embedded: Option<EmbeddedResult>,
    },
    /// 无法解析的原始帧
    Raw(String),
}

/// 解码一帧
pub fn decode_frame(raw: &str) -> FrameEvent {
    let frame = match InboundFrame::from_json(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("帧解析失败，按原始文本处理: {}", e);
            return FrameEvent::Raw(raw.to_string());
        }
    };

    let text = frame.content_text();
    match frame.frame_type.as_deref() {
        Some("thought") => FrameEvent::Thought {
            node: frame.node.unwrap_or_default(),
            text,
        },
        Some("status") => FrameEvent::Status(NextStep::parse(&text)),
        _ => {
            let embedded = if frame.has_text_content() {
                probe_embedded(&text)
            } else {
                None
            };
            FrameEvent::Content {
                node: frame.node,
                text,
                embedded,
            }
        }
    }
}

/// 会话事件，供渲染方订阅
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    EntryAppended(TranscriptEntry),
    ActivityChanged(Option<AgentActivity>),
}

/// 会话快照，渲染方读取时不占用会话锁
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationSnapshot {
    pub entries: Vec<TranscriptEntry>,
    pub activity: Option<AgentActivity>,
}

/// 会话状态：只追加的记录 + 当前活动
#[derive(Debug, Default)]
pub struct Conversation {
    transcript: Transcript,
    activity: Option<AgentActivity>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以外部保存的历史开始一个新会话
    pub fn with_history(entries: Vec<TranscriptEntry>) -> Self {
        Self {
            transcript: Transcript::from_history(entries),
            activity: None,
        }
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            entries: self.transcript.entries().to_vec(),
            activity: self.activity.clone(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn activity(&self) -> Option<&AgentActivity> {
        self.activity.as_ref()
    }

    /// 处理一帧，返回按发生顺序排列的事件
    pub fn apply_frame(&mut self, raw: &str) -> Vec<ConversationEvent> {
        let mut events = Vec::new();

        match decode_frame(raw) {
            FrameEvent::Raw(text) => {
                events.push(self.append(TranscriptEntry::assistant(text)));
            }
            FrameEvent::Thought { node, text } => {
                events.extend(self.set_activity(Some(AgentActivity::new(node, text))));
            }
            FrameEvent::Status(NextStep::Finish) => {
                events.extend(self.set_activity(None));
            }
            FrameEvent::Status(NextStep::Node(node)) => {
                let label = activity::display_label(&node);
                events.extend(self.set_activity(Some(AgentActivity::new(SYSTEM_NODE, label))));
            }
            FrameEvent::Content { node, text, embedded } => {
                let entry = match embedded {
                    Some(EmbeddedResult::DataResult { summary, columns, data }) => {
                        TranscriptEntry::table(summary, columns, data)
                    }
                    Some(EmbeddedResult::ChartResult { config }) => TranscriptEntry::chart(config),
                    Some(EmbeddedResult::ChartSuggestions { suggestions }) => {
                        TranscriptEntry::chart_suggestions(suggestions)
                    }
                    None => TranscriptEntry::assistant(text.clone()),
                };
                events.push(self.append(entry));

                if node.as_deref() == Some(EXECUTOR_NODE) && text.contains(EXECUTOR_ERROR_MARKER) {
                    events.extend(self.set_activity(None));
                }
            }
        }

        events
    }

    /// 记录用户发送的消息
    pub fn record_user_message(&mut self, text: impl Into<String>) -> ConversationEvent {
        self.append(TranscriptEntry::user(text))
    }

    /// 记录发送失败
    pub fn record_send_failure(&mut self) -> ConversationEvent {
        self.append(TranscriptEntry::error(SEND_FAILURE_TEXT))
    }

    fn append(&mut self, entry: TranscriptEntry) -> ConversationEvent {
        ConversationEvent::EntryAppended(self.transcript.push(entry).clone())
    }

    /// 替换活动状态，未变化时不产生事件
    fn set_activity(&mut self, activity: Option<AgentActivity>) -> Option<ConversationEvent> {
        if self.activity == activity {
            return None;
        }
        self.activity = activity.clone();
        Some(ConversationEvent::ActivityChanged(activity))
    }
}
