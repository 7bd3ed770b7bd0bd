use thiserror::Error;

/// 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("连接错误: {0}")]
    Connection(String),

    #[error("连接未建立")]
    NotConnected,

    #[error("无效参数: {0}")]
    InvalidArgument(String),
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;
