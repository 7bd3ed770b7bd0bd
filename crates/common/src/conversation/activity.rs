/// 智能体活动状态
/// 
/// 后端当前正在执行的步骤，每个 thought / status 帧整体替换，终止信号时清空

/// status 帧内容中节点名之前的固定前缀
pub const STATUS_MARKER: &str = "Next step: ";

/// 表示流程结束的节点名
pub const FINISH_SENTINEL: &str = "FINISH";

/// status 帧产生的活动状态所使用的节点名
pub const SYSTEM_NODE: &str = "System";

/// 节点名到进度提示的映射
const STEP_LABELS: &[(&str, &str)] = &[
    ("sql_planner", "🧠 Planification de la requête SQL..."),
    ("sql_executor", "⚡️ Exécution de la requête sur la base..."),
    ("data_analyst", "📊 Analyse des résultats..."),
    ("csv_loader", "📂 Chargement des données..."),
    ("supervisor", "🤔 Analyse de la demande..."),
    ("chart_generator", "📈 Génération du graphique..."),
];

/// 当前活动
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentActivity {
    pub node: String,
    pub label: String,
}

impl AgentActivity {
    pub fn new(node: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            label: label.into(),
        }
    }
}

/// status 帧描述的下一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// 流程结束
    Finish,
    /// 即将执行的节点
    Node(String),
}

impl NextStep {
    /// 去掉前缀得到节点名
    pub fn parse(content: &str) -> Self {
        let node = content.strip_prefix(STATUS_MARKER).unwrap_or(content);
        if node == FINISH_SENTINEL {
            Self::Finish
        } else {
            Self::Node(node.to_string())
        }
    }
}

/// 节点的友好提示，未知节点返回 `None`
pub fn step_label(node: &str) -> Option<&'static str> {
    STEP_LABELS
        .iter()
        .find(|(key, _)| *key == node)
        .map(|(_, label)| *label)
}

/// 节点的显示文字，未知节点原样返回
pub fn display_label(node: &str) -> String {
    step_label(node).map(str::to_string).unwrap_or_else(|| node.to_string())
}
