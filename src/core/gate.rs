//! 功能档位门控
//!
//! Planner / Task Runner / Responder 每次运行时查询一次，决定当前调用方是否允许并行等高级执行方式。

/// 功能门控 trait
pub trait FeatureGate: Send + Sync {
    /// 是否允许并行（fan-out）执行工具批次
    fn allows_parallel(&self) -> bool;
}

/// 固定档位：由配置 tier.advanced_execution 决定
#[derive(Debug, Clone, Copy)]
pub struct StaticGate {
    advanced: bool,
}

impl StaticGate {
    pub fn new(advanced: bool) -> Self {
        Self { advanced }
    }

    pub fn advanced() -> Self {
        Self::new(true)
    }

    pub fn basic() -> Self {
        Self::new(false)
    }
}

impl Default for StaticGate {
    fn default() -> Self {
        Self::advanced()
    }
}

impl FeatureGate for StaticGate {
    fn allows_parallel(&self) -> bool {
        self.advanced
    }
}
