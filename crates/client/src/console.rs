/// 控制台前端
/// 
/// 从标准输入读取消息与命令，按到达顺序渲染客户端事件

use common::conversation::{AgentActivity, Attachment, ConversationEvent, Role, TranscriptEntry};
use common::QueryMode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ws::{ChatClient, ClientEvent, ClientSettings, ConnectionState, ConnectionStatus};

/// 控制台输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// 切换查询模式
    Mode(QueryMode),
    /// 切换到指定会话
    Session(String),
    /// 新建会话
    NewSession,
    /// 立即重连
    Reconnect,
    /// 打印连接与活动状态
    Status,
    /// 退出
    Quit,
    /// 发送消息
    Message(String),
    /// 空行
    Empty,
    /// 无法识别的命令
    Invalid(String),
}

/// 解析一行输入
pub fn parse_line(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ConsoleCommand::Message(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("mode", arg) => match arg.parse::<QueryMode>() {
            Ok(mode) => ConsoleCommand::Mode(mode),
            Err(e) => ConsoleCommand::Invalid(e.to_string()),
        },
        ("session", "") => ConsoleCommand::Invalid("usage: /session <id>".to_string()),
        ("session", id) => ConsoleCommand::Session(id.to_string()),
        ("new", _) => ConsoleCommand::NewSession,
        ("reconnect", _) => ConsoleCommand::Reconnect,
        ("status", _) => ConsoleCommand::Status,
        ("quit" | "exit", _) => ConsoleCommand::Quit,
        (other, _) => ConsoleCommand::Invalid(format!("commande inconnue: /{}", other)),
    }
}

/// 渲染会话条目，用户自己的消息不回显
pub fn render_entry(entry: &TranscriptEntry) -> Option<String> {
    if entry.role == Role::User {
        return None;
    }
    let line = match &entry.attachment {
        None => entry.text.clone(),
        Some(Attachment::Table { columns, rows }) => format!(
            "{} [{} colonnes, {} lignes: {}]",
            entry.text,
            columns.len(),
            rows.len(),
            columns.join(", ")
        ),
        Some(Attachment::Chart(_)) => format!("{} [graphique]", entry.text),
        Some(Attachment::ChartSuggestions(suggestions)) => format!(
            "{} [{} suggestions]",
            entry.text,
            suggestions.as_array().map_or(0, Vec::len)
        ),
        Some(Attachment::Error) => format!("⚠️  {}", entry.text),
    };
    Some(line)
}

pub fn render_activity(activity: Option<&AgentActivity>) -> String {
    match activity {
        Some(activity) => format!("… [{}] {}", activity.node, activity.label),
        None => "… terminé".to_string(),
    }
}

pub fn render_status(status: &ConnectionStatus) -> String {
    match status.state {
        ConnectionState::Idle => "○ déconnecté".to_string(),
        ConnectionState::Connecting => "◌ connexion...".to_string(),
        ConnectionState::Open => "● connecté".to_string(),
        ConnectionState::Reconnecting => format!("◌ reconnexion (tentative {})", status.attempts),
        ConnectionState::Abandoned => {
            "✖ connexion perdue, tapez /reconnect pour réessayer".to_string()
        }
    }
}

/// 启动渲染任务
pub fn spawn_renderer(mut events: broadcast::Receiver<ClientEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClientEvent::Connectivity(status)) => println!("{}", render_status(&status)),
                Ok(ClientEvent::Conversation(ConversationEvent::EntryAppended(entry))) => {
                    if let Some(line) = render_entry(&entry) {
                        println!("{}", line);
                    }
                }
                Ok(ClientEvent::Conversation(ConversationEvent::ActivityChanged(activity))) => {
                    println!("{}", render_activity(activity.as_ref()));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("渲染落后，跳过 {} 个事件", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("渲染任务结束");
    })
}

/// 一个会话上下文：会话 ID、独占的客户端与渲染任务
pub struct ActiveSession {
    pub id: String,
    pub client: ChatClient,
    renderer: JoinHandle<()>,
}

impl ActiveSession {
    /// 新建客户端并开始连接
    pub fn open(settings: &ClientSettings, id: String) -> Self {
        let client = ChatClient::new(settings.clone());
        let renderer = spawn_renderer(client.subscribe());
        client.connect();
        Self { id, client, renderer }
    }

    /// 拆除客户端并停止渲染
    pub async fn close(self) {
        self.client.teardown().await;
        self.renderer.abort();
    }
}

/// 读取标准输入直到 `/quit` 或输入结束
///
/// 切换会话（`/session`、`/new`）时拆除当前客户端，为新会话建立新的客户端
pub async fn run(settings: ClientSettings, mut mode: QueryMode, session_id: String) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session = ActiveSession::open(&settings, session_id);

    let result: anyhow::Result<()> = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e.into()),
        };

        match parse_line(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Message(text) => {
                if !session.client.is_connected() {
                    debug!("未连接，消息将记录为发送失败");
                }
                session.client.send(text, mode, session.id.as_str()).await;
            }
            ConsoleCommand::Mode(new_mode) => {
                mode = new_mode;
                println!("mode: {}", mode);
            }
            ConsoleCommand::Session(id) => {
                session.close().await;
                session = ActiveSession::open(&settings, id);
                println!("session: {}", session.id);
            }
            ConsoleCommand::NewSession => {
                session.close().await;
                session = ActiveSession::open(&settings, uuid::Uuid::new_v4().to_string());
                println!("session: {}", session.id);
            }
            ConsoleCommand::Reconnect => session.client.reconnect_now(),
            ConsoleCommand::Status => {
                println!("{}", render_status(&session.client.status()));
                println!("mode: {}, session: {}", mode, session.id);
                let snapshot = session.client.snapshot().await;
                println!("{}", render_activity(snapshot.activity.as_ref()));
                println!("{} messages", snapshot.entries.len());
            }
            ConsoleCommand::Invalid(reason) => println!("{}", reason),
            ConsoleCommand::Quit => break Ok(()),
        }
    };

    session.close().await;
    result
}
