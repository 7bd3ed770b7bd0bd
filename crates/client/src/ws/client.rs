/// WebSocket 客户端
/// 
/// 与分析后端保持单条长连接。所有连接事件、帧处理、重连计时都在同一个
/// 驱动任务里串行执行；`ChatClient` 只是向驱动任务投递命令的句柄。

use common::conversation::{Conversation, ConversationEvent, ConversationSnapshot, TranscriptEntry};
use common::protocol::codec::{self, Incoming};
use common::{OutboundEnvelope, QueryMode};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::lifecycle::{CloseKind, CloseOutcome, ConnectionState, ConnectionStatus, Lifecycle};
use crate::config::Config;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, tungstenite::Error>> + Send>>;

/// 事件通道容量
const EVENT_CAPACITY: usize = 256;

/// 客户端参数
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Server 地址
    pub server_url: String,
    /// 重连间隔（固定）
    pub reconnect_delay: Duration,
    /// 最大重连次数
    pub max_reconnect_attempts: u32,
}

impl From<&Config> for ClientSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            server_url: cfg.server_ws_url.clone(),
            reconnect_delay: cfg.reconnect_delay,
            max_reconnect_attempts: cfg.max_reconnect_attempts,
        }
    }
}

/// 推送给订阅方的事件
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// 连接状态变化
    Connectivity(ConnectionStatus),
    /// 会话记录或活动状态变化
    Conversation(ConversationEvent),
}

/// 驱动任务命令
enum Command {
    Connect,
    ReconnectNow,
    Send {
        envelope: OutboundEnvelope,
        done: oneshot::Sender<bool>,
    },
}

/// 聊天客户端句柄
///
/// 每个会话上下文持有一个；句柄被丢弃时驱动任务随之结束，
/// 重连计时器和连接都会被释放
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    conversation: Arc<RwLock<Conversation>>,
    events: broadcast::Sender<ClientEvent>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// 创建客户端并启动驱动任务（不会立即连接）
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_history(settings, Vec::new())
    }

    /// 以外部保存的会话历史创建客户端
    ///
    /// 历史只能在创建时注入；切换会话应当拆除旧客户端并新建
    pub fn with_history(settings: ClientSettings, history: Vec<TranscriptEntry>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let lifecycle = Lifecycle::new(settings.max_reconnect_attempts);
        let (status_tx, status) = watch::channel(lifecycle.status());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let conversation = Arc::new(RwLock::new(Conversation::with_history(history)));
        let shutdown = CancellationToken::new();

        let driver = Driver {
            settings,
            lifecycle,
            socket: None,
            connecting: None,
            retry: None,
            conversation: conversation.clone(),
            status_tx,
            events: events.clone(),
        };
        let task = tokio::spawn(driver.run(command_rx, shutdown.clone()));

        Self {
            commands,
            status,
            conversation,
            events,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// 建立连接；已连接时为空操作
    pub fn connect(&self) {
        if self.commands.send(Command::Connect).is_err() {
            debug!("客户端已拆除，忽略连接请求");
        }
    }

    /// 立即重连：重连计数清零，跳过等待中的重连计时
    pub fn reconnect_now(&self) {
        if self.commands.send(Command::ReconnectNow).is_err() {
            debug!("客户端已拆除，忽略重连请求");
        }
    }

    /// 发送消息
    ///
    /// 未连接时不排队，只在会话记录中追加一条错误提示。
    /// 返回消息是否已写入连接。
    pub async fn send(
        &self,
        text: impl Into<String>,
        mode: QueryMode,
        session_id: impl Into<String>,
    ) -> bool {
        let envelope = OutboundEnvelope::new(text, mode, session_id);
        let (done, done_rx) = oneshot::channel();

        if self.commands.send(Command::Send { envelope, done }).is_ok() {
            if let Ok(sent) = done_rx.await {
                return sent;
            }
        }

        // 驱动任务已退出
        warn!("客户端已拆除，消息未发送");
        let event = self.conversation.write().await.record_send_failure();
        let _ = self.events.send(ClientEvent::Conversation(event));
        false
    }

    /// 拆除客户端：取消重连计时并关闭连接，可重复调用
    pub async fn teardown(&self) {
        self.shutdown.cancel();

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("连接任务异常退出: {}", e);
            }
        }
    }

    /// 当前连接状态
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// 是否已连接
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// 订阅连接状态变化
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// 订阅客户端事件
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// 会话记录与活动状态的快照
    pub async fn snapshot(&self) -> ConversationSnapshot {
        self.conversation.read().await.snapshot()
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// 驱动任务：独占连接、待完成的连接请求与重连计时器
struct Driver {
    settings: ClientSettings,
    lifecycle: Lifecycle,
    socket: Option<WsStream>,
    connecting: Option<ConnectFuture>,
    retry: Option<Pin<Box<Sleep>>>,
    conversation: Arc<RwLock<Conversation>>,
    status_tx: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ClientEvent>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("收到拆除信号");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                result = wait_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result);
                }
                message = next_message(&mut self.socket) => {
                    self.on_message(message).await;
                }
                _ = wait_retry(&mut self.retry) => {
                    self.retry = None;
                    info!("重连计时结束，开始第 {} 次重连", self.lifecycle.attempts());
                    self.connect().await;
                }
            }
        }

        self.teardown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect().await,
            Command::ReconnectNow => {
                info!("手动重连");
                self.lifecycle.begin_manual_reconnect();
                self.start_connect().await;
            }
            Command::Send { envelope, done } => {
                let sent = self.send(envelope).await;
                let _ = done.send(sent);
            }
        }
    }

    async fn connect(&mut self) {
        if !self.lifecycle.begin_connect() {
            debug!("连接已建立，忽略连接请求");
            return;
        }
        self.start_connect().await;
    }

    /// 释放旧连接与计时器后发起新连接，保证任意时刻最多一个连接
    async fn start_connect(&mut self) {
        self.retry = None;
        self.connecting = None;
        self.release_socket().await;

        info!("尝试连接到 Server: {}", self.settings.server_url);
        let url = self.settings.server_url.clone();
        self.connecting = Some(Box::pin(async move {
            connect_async(url).await.map(|(ws_stream, _)| ws_stream)
        }));
        self.publish_status();
    }

    fn on_connect_result(&mut self, result: Result<WsStream, tungstenite::Error>) {
        match result {
            Ok(ws_stream) => {
                info!("✅ WebSocket 连接成功");
                self.socket = Some(ws_stream);
                self.lifecycle.on_open();
                self.publish_status();
            }
            Err(e) => {
                warn!("连接失败: {}", e);
                self.on_closed(CloseKind::Unclean);
            }
        }
    }

    async fn on_message(&mut self, message: Option<Result<Message, tungstenite::Error>>) {
        match message {
            Some(Ok(message)) => match codec::decode(message) {
                Incoming::Frame(text) => self.dispatch(&text).await,
                Incoming::Close => {
                    info!("收到关闭握手，连接正常关闭");
                    self.release_socket().await;
                    self.on_closed(CloseKind::Clean);
                }
                Incoming::Control => debug!("收到控制帧，忽略"),
            },
            Some(Err(e)) => {
                warn!("连接异常中断: {}", e);
                self.socket = None;
                self.on_closed(CloseKind::Unclean);
            }
            None => {
                warn!("连接被对端断开");
                self.socket = None;
                self.on_closed(CloseKind::Unclean);
            }
        }
    }

    fn on_closed(&mut self, kind: CloseKind) {
        let max_attempts = self.settings.max_reconnect_attempts;
        match self.lifecycle.on_close(kind) {
            CloseOutcome::Idle => info!("连接已关闭，不再重连"),
            CloseOutcome::Retry { attempt } => {
                warn!(
                    "{:?} 后重新连接（第 {}/{} 次）",
                    self.settings.reconnect_delay, attempt, max_attempts
                );
                self.retry = Some(Box::pin(tokio::time::sleep(self.settings.reconnect_delay)));
            }
            CloseOutcome::Abandoned => {
                error!("重连 {} 次均失败，放弃连接", max_attempts);
            }
        }
        self.publish_status();
    }

    async fn dispatch(&mut self, text: &str) {
        let events = self.conversation.write().await.apply_frame(text);
        for event in events {
            self.emit(ClientEvent::Conversation(event));
        }
    }

    async fn send(&mut self, envelope: OutboundEnvelope) -> bool {
        let state = self.lifecycle.state();
        if state != ConnectionState::Open {
            warn!("连接未建立（{:?}），消息未发送", state);
            let event = self.conversation.write().await.record_send_failure();
            self.emit(ClientEvent::Conversation(event));
            return false;
        }

        let event = self
            .conversation
            .write()
            .await
            .record_user_message(envelope.content.clone());
        self.emit(ClientEvent::Conversation(event));

        match self.transmit(&envelope).await {
            Ok(()) => {
                debug!("已发送消息: mode={}, session_id={}", envelope.mode, envelope.session_id);
                true
            }
            Err(e @ common::Error::Connection(_)) => {
                error!("发送消息失败: {}", e);
                self.socket = None;
                self.on_closed(CloseKind::Unclean);
                false
            }
            Err(e) => {
                error!("发送消息失败: {}", e);
                false
            }
        }
    }

    async fn transmit(&mut self, envelope: &OutboundEnvelope) -> common::Result<()> {
        let socket = self.socket.as_mut().ok_or(common::Error::NotConnected)?;
        let message = codec::encode(envelope)?;
        socket
            .send(message)
            .await
            .map_err(|e| common::Error::Connection(e.to_string()))
    }

    async fn release_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                debug!("关闭连接: {}", e);
            }
        }
    }

    async fn teardown(&mut self) {
        self.retry = None;
        self.connecting = None;
        self.release_socket().await;
        self.lifecycle.on_teardown();
        self.publish_status();
        info!("连接已拆除");
    }

    fn publish_status(&self) {
        let status = self.lifecycle.status();
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            self.emit(ClientEvent::Connectivity(status));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // 没有订阅方时发送失败，忽略即可
        let _ = self.events.send(event);
    }
}

async fn wait_connect(connecting: &mut Option<ConnectFuture>) -> Result<WsStream, tungstenite::Error> {
    match connecting {
        Some(future) => future.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_message(socket: &mut Option<WsStream>) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::conversation::Role;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn settings(server_url: String, delay_ms: u64, max_reconnect_attempts: u32) -> ClientSettings {
        ClientSettings {
            server_url,
            reconnect_delay: Duration::from_millis(delay_ms),
            max_reconnect_attempts,
        }
    }

    async fn wait_for_status(client: &ChatClient, predicate: impl FnMut(&ConnectionStatus) -> bool) {
        let mut status = client.watch_status();
        let _ = timeout(WAIT, status.wait_for(predicate))
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed");
    }

    async fn wait_for_state(client: &ChatClient, state: ConnectionState) {
        wait_for_status(client, |s| s.state == state).await;
    }

    async fn unused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("ws://{}", listener.local_addr().unwrap())
    }

    #[tokio::test]
    async fn test_send_while_idle_records_error() {
        let client = ChatClient::new(settings(unused_url().await, 3000, 10));

        assert!(!client.send("bonjour", QueryMode::Chat, "default").await);

        let entries = client.snapshot().await.entries;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_error());
        assert_eq!(entries[0].role, Role::Assistant);

        client.teardown().await;
    }

    #[tokio::test]
    async fn test_exchange_then_clean_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (received_tx, received_rx) = oneshot::channel::<String>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                r#"{"type":"status","content":"Next step: sql_executor"}"#.to_string(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text("pong".to_string())).await.unwrap();

            let text = loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => break text,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected: {:?}", other),
                }
            };
            received_tx.send(text).unwrap();

            let _ = ws.close(None).await;
            while let Some(Ok(_)) = ws.next().await {}
        });

        let client = ChatClient::new(settings(url, 50, 10));
        let mut events = client.subscribe();
        client.connect();
        wait_for_state(&client, ConnectionState::Open).await;

        // 等待 "pong" 被追加到记录中
        timeout(WAIT, async {
            loop {
                if let Ok(ClientEvent::Conversation(ConversationEvent::EntryAppended(entry))) =
                    events.recv().await
                {
                    assert_eq!(entry.text, "pong");
                    break;
                }
            }
        })
        .await
        .expect("no entry appended");

        let activity = client.snapshot().await.activity.expect("activity should be set");
        assert_eq!(activity.node, "System");
        assert_eq!(activity.label, "⚡️ Exécution de la requête sur la base...");

        assert!(client.send("combien ?", QueryMode::Sql, "s-1").await);
        let received = timeout(WAIT, received_rx).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&received).unwrap();
        assert_eq!(value, json!({"content": "combien ?", "mode": "sql", "session_id": "s-1"}));

        // 正常关闭后不安排重连
        wait_for_state(&client, ConnectionState::Idle).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.status().state, ConnectionState::Idle);
        assert_eq!(client.status().attempts, 0);

        let entries = client.snapshot().await.entries;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "pong");
        assert_eq!(entries[1].role, Role::User);
        assert_eq!(entries[1].text, "combien ?");

        client.teardown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unclean_close_schedules_retry_and_teardown_cancels_it() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // 不做关闭握手直接断开
            drop(ws);
        });

        let client = ChatClient::new(settings(url, 10_000, 10));
        client.connect();
        wait_for_state(&client, ConnectionState::Reconnecting).await;
        assert_eq!(client.status().attempts, 1);
        server.await.unwrap();

        client.teardown().await;
        client.teardown().await;
        assert_eq!(client.status().state, ConnectionState::Idle);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_abandons_then_manual_reconnect_resets_counter() {
        let client = ChatClient::new(settings(unused_url().await, 300, 2));
        client.connect();

        wait_for_state(&client, ConnectionState::Abandoned).await;
        assert_eq!(client.status().attempts, 2);

        client.reconnect_now();
        wait_for_status(&client, |s| {
            s.state == ConnectionState::Reconnecting && s.attempts == 1
        })
        .await;

        client.teardown().await;
    }

    #[tokio::test]
    async fn test_send_after_teardown_records_single_error() {
        let client = ChatClient::new(settings(unused_url().await, 3000, 10));
        client.teardown().await;
        client.teardown().await;

        assert!(!client.send("trop tard", QueryMode::Chat, "default").await);
        let entries = client.snapshot().await.entries;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_error());
    }

    #[tokio::test]
    async fn test_history_is_kept_and_appended() {
        let history = vec![
            TranscriptEntry::user("combien de ventes ?"),
            TranscriptEntry::assistant("42"),
        ];
        let client = ChatClient::with_history(settings(unused_url().await, 3000, 10), history);

        assert!(!client.send("et par pays ?", QueryMode::Chat, "s-1").await);
        let entries = client.snapshot().await.entries;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].text, "combien de ventes ?");
        assert_eq!(entries[1].text, "42");
        assert!(entries[2].is_error());

        client.teardown().await;
    }

    #[tokio::test]
    async fn test_reconnect_now_skips_pending_retry_and_closes_old_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (closed_tx, closed_rx) = oneshot::channel::<bool>();
        let (third_tx, third_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            // 第一条连接不做关闭握手直接断开
            let (stream, _) = listener.accept().await.unwrap();
            drop(tokio_tungstenite::accept_async(stream).await.unwrap());

            let (stream, _) = listener.accept().await.unwrap();
            let mut second = tokio_tungstenite::accept_async(stream).await.unwrap();
            let closed = matches!(second.next().await, Some(Ok(Message::Close(_))));
            closed_tx.send(closed).unwrap();

            let (stream, _) = listener.accept().await.unwrap();
            let mut third = tokio_tungstenite::accept_async(stream).await.unwrap();
            third_tx.send(()).unwrap();
            while let Some(Ok(_)) = third.next().await {}
        });

        let client = ChatClient::new(settings(url, 30_000, 10));
        client.connect();
        wait_for_state(&client, ConnectionState::Reconnecting).await;
        assert_eq!(client.status().attempts, 1);

        // 重连间隔为 30 秒，手动重连必须跳过等待
        client.reconnect_now();
        wait_for_state(&client, ConnectionState::Open).await;
        assert_eq!(client.status().attempts, 0);

        // 已打开时手动重连：先关闭旧连接再建立新连接
        client.reconnect_now();
        let closed = timeout(WAIT, closed_rx).await.unwrap().unwrap();
        assert!(closed, "old socket was not closed with a close frame");
        timeout(WAIT, third_rx).await.unwrap().unwrap();
        wait_for_state(&client, ConnectionState::Open).await;
        assert_eq!(client.status().attempts, 0);

        client.teardown().await;
        server.await.unwrap();
    }
}
