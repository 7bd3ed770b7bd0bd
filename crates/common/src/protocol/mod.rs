/// 聊天协议模块
/// 
/// 定义服务端推送帧、客户端发送信封，以及帧内嵌结果的探测与编解码

pub mod codec;
pub mod message;
pub mod payload;

pub use message::{InboundFrame, OutboundEnvelope, QueryMode};
pub use payload::{probe_embedded, EmbeddedResult};
