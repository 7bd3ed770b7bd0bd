/// WebSocket 客户端模块
/// 
/// 客户端通过 WebSocket 连接到分析后端

pub mod client;
pub mod lifecycle;

pub use client::{ChatClient, ClientEvent, ClientSettings};
pub use lifecycle::{ConnectionState, ConnectionStatus};
