/// 连接生命周期状态机
/// 
/// 纯状态转换，不涉及 IO；由连接驱动任务独占持有

/// 默认最大重连次数
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Abandoned,
}

/// 连接关闭方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// 完成了关闭握手
    Clean,
    /// 网络中断、异常复位、连接失败
    Unclean,
}

/// 关闭后的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// 正常关闭，不重连
    Idle,
    /// 安排第 `attempt` 次重连
    Retry { attempt: u32 },
    /// 重连次数耗尽
    Abandoned,
}

/// 对外发布的连接状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempts: u32,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// 生命周期状态机
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
}

impl Lifecycle {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            attempts: self.attempts,
        }
    }

    /// 开始连接；已打开时返回 `false`，不做任何改变
    pub fn begin_connect(&mut self) -> bool {
        if self.state == ConnectionState::Open {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// 手动重连：计数清零后开始连接，任何状态下都生效
    pub fn begin_manual_reconnect(&mut self) {
        self.attempts = 0;
        self.state = ConnectionState::Connecting;
    }

    /// 连接建立
    pub fn on_open(&mut self) {
        self.state = ConnectionState::Open;
        self.attempts = 0;
    }

    /// 连接关闭（含连接失败）
    pub fn on_close(&mut self, kind: CloseKind) -> CloseOutcome {
        match kind {
            CloseKind::Clean => {
                self.state = ConnectionState::Idle;
                CloseOutcome::Idle
            }
            CloseKind::Unclean if self.attempts < self.max_attempts => {
                self.attempts += 1;
                self.state = ConnectionState::Reconnecting;
                CloseOutcome::Retry {
                    attempt: self.attempts,
                }
            }
            CloseKind::Unclean => {
                self.state = ConnectionState::Abandoned;
                CloseOutcome::Abandoned
            }
        }
    }

    /// 主动拆除
    pub fn on_teardown(&mut self) {
        self.state = ConnectionState::Idle;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(MAX_RECONNECT_ATTEMPTS)
    }
}
