/// 帧内嵌结果探测
/// 
/// 内容帧的文本里可能夹带一个 JSON 对象（查询结果、图表配置、图表建议），
/// 这里从第一个 `{` 到最后一个 `}` 贪婪截取并尝试解析

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// 字段为 `null` 时取默认值
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 内嵌结果
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmbeddedResult {
    /// SQL 执行结果
    DataResult {
        #[serde(default, deserialize_with = "null_as_default")]
        summary: String,
        #[serde(default, deserialize_with = "null_as_default")]
        columns: Vec<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        data: Vec<Value>,
    },
    /// Plotly 图表配置
    ChartResult {
        #[serde(default)]
        config: Value,
    },
    /// 图表建议列表
    ChartSuggestions {
        #[serde(default)]
        suggestions: Value,
    },
}

/// 截取文本中第一个 `{` 到最后一个 `}` 之间的片段
pub fn embedded_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// 尝试从文本中解析内嵌结果
///
/// 截取失败、JSON 无效或类型未知时返回 `None`，调用方按普通文本处理
pub fn probe_embedded(text: &str) -> Option<EmbeddedResult> {
    let span = embedded_object_span(text)?;
    match serde_json::from_str::<EmbeddedResult>(span) {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::debug!("内嵌结果解析失败，按文本处理: {}", e);
            None
        }
    }
}
