/// 配置管理

use common::{Error, QueryMode};
use std::time::Duration;

use crate::ws::lifecycle::MAX_RECONNECT_ATTEMPTS;

/// 默认重连间隔（毫秒）
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_ws_url: String,
    pub session_id: String,
    pub query_mode: QueryMode,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub log_level: String,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> anyhow::Result<Self> {
        let server_ws_url = std::env::var("CHAT_WS_URL")
            .unwrap_or_else(|_| "ws://localhost:8000/api/v1/ws/chat".to_string());

        let session_id = std::env::var("SESSION_ID")
            .unwrap_or_else(|_| "default".to_string());

        let query_mode = std::env::var("QUERY_MODE")
            .unwrap_or_else(|_| "chat".to_string())
            .parse::<QueryMode>()
            .map_err(|e| Error::Config(format!("QUERY_MODE: {}", e)))?;

        let reconnect_delay_ms: u64 = parse_var("RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)?;

        let max_reconnect_attempts = parse_var("MAX_RECONNECT_ATTEMPTS", MAX_RECONNECT_ATTEMPTS)?;

        let log_level = std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            server_ws_url,
            session_id,
            query_mode,
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            max_reconnect_attempts,
            log_level,
        })
    }
}

/// 读取数值型环境变量，缺省时使用默认值
fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::Error::from(Error::Config(format!("{}={}: {}", name, raw, e)))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_and_invalid() {
        let missing: u64 = parse_var("CHAT_CLIENT_TEST_MISSING_VAR", 3000).unwrap();
        assert_eq!(missing, 3000);

        std::env::set_var("CHAT_CLIENT_TEST_BAD_DELAY", "trois");
        let bad: anyhow::Result<u64> = parse_var("CHAT_CLIENT_TEST_BAD_DELAY", 3000);
        assert!(bad.is_err());

        std::env::set_var("CHAT_CLIENT_TEST_GOOD_DELAY", " 250 ");
        let good: u64 = parse_var("CHAT_CLIENT_TEST_GOOD_DELAY", 3000).unwrap();
        assert_eq!(good, 250);
    }
}
