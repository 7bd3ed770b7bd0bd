/// 会话记录
/// 
/// 按到达顺序追加的对话条目，条目一经追加不再修改

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 图表条目的固定说明文字
pub const CHART_CAPTION: &str = "Voici le graphique demandé :";

/// 图表建议条目的固定说明文字
pub const CHART_SUGGESTIONS_CAPTION: &str = "Voici quelques suggestions de visualisations :";

/// 未连接时发送失败的提示文字
pub const SEND_FAILURE_TEXT: &str =
    "Erreur : connexion au serveur indisponible, le message n'a pas été envoyé.";

/// 条目角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 条目类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Table,
    Chart,
    ChartSuggestions,
    Error,
}

/// 条目附带的结构化数据，按类别区分
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    /// 查询结果表
    Table { columns: Vec<String>, rows: Vec<Value> },
    /// 图表配置
    Chart(Value),
    /// 图表建议
    ChartSuggestions(Value),
    /// 错误提示，无附加数据
    Error,
}

impl Attachment {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Table { .. } => EntryKind::Table,
            Self::Chart(_) => EntryKind::Chart,
            Self::ChartSuggestions(_) => EntryKind::ChartSuggestions,
            Self::Error => EntryKind::Error,
        }
    }
}

/// 会话条目
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    fn new(role: Role, text: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self {
            role,
            text: text.into(),
            attachment,
            created_at: Utc::now(),
        }
    }

    /// 用户消息
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text, None)
    }

    /// 助手纯文本消息
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text, None)
    }

    /// 系统消息（历史恢复时使用）
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text, None)
    }

    /// 查询结果表
    pub fn table(summary: impl Into<String>, columns: Vec<String>, rows: Vec<Value>) -> Self {
        Self::new(Role::Assistant, summary, Some(Attachment::Table { columns, rows }))
    }

    /// 图表
    pub fn chart(config: Value) -> Self {
        Self::new(Role::Assistant, CHART_CAPTION, Some(Attachment::Chart(config)))
    }

    /// 图表建议
    pub fn chart_suggestions(suggestions: Value) -> Self {
        Self::new(
            Role::Assistant,
            CHART_SUGGESTIONS_CAPTION,
            Some(Attachment::ChartSuggestions(suggestions)),
        )
    }

    /// 错误提示
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text, Some(Attachment::Error))
    }

    pub fn kind(&self) -> Option<EntryKind> {
        self.attachment.as_ref().map(Attachment::kind)
    }

    pub fn is_error(&self) -> bool {
        self.kind() == Some(EntryKind::Error)
    }
}

/// 只追加的会话记录
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加条目，返回追加后的条目引用
    pub fn push(&mut self, entry: TranscriptEntry) -> &TranscriptEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// 以外部保存的历史开始记录，之后只能追加
    pub fn from_history(entries: Vec<TranscriptEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TranscriptEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_kinds() {
        assert_eq!(TranscriptEntry::user("salut").kind(), None);
        assert_eq!(TranscriptEntry::assistant("ok").kind(), None);
        assert_eq!(
            TranscriptEntry::table("3 lignes", vec!["a".into()], vec![json!({"a": 1})]).kind(),
            Some(EntryKind::Table)
        );
        assert_eq!(TranscriptEntry::chart(json!({})).text, CHART_CAPTION);
        assert_eq!(
            TranscriptEntry::chart_suggestions(json!([])).kind(),
            Some(EntryKind::ChartSuggestions)
        );

        let error = TranscriptEntry::error(SEND_FAILURE_TEXT);
        assert!(error.is_error());
        assert_eq!(error.role, Role::Assistant);
    }

    #[test]
    fn test_transcript_keeps_order() {
        let mut transcript = Transcript::new();
        assert!(transcript.is_empty());

        transcript.push(TranscriptEntry::user("un"));
        transcript.push(TranscriptEntry::assistant("deux"));
        let last = transcript.push(TranscriptEntry::assistant("trois"));
        assert_eq!(last.text, "trois");

        let texts: Vec<&str> = transcript.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["un", "deux", "trois"]);
        assert_eq!(transcript.len(), 3);
    }

    #[test]
    fn test_from_history() {
        let mut transcript = Transcript::from_history(vec![
            TranscriptEntry::system("contexte"),
            TranscriptEntry::user("question"),
        ]);
        transcript.push(TranscriptEntry::assistant("réponse"));
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.entries()[0].role, Role::System);
        assert_eq!(transcript.last().unwrap().text, "réponse");
    }
}
