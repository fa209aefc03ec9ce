//! 模型工厂注册表
//!
//! INIT 只携带数据形式的模型描述, Worker 按名称找到本地注册的工厂并由它
//! 加载模型。任何可执行代码都不会经过网络。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use simfarm_core::{ModelArtifact, SimFarmError, SimFarmResult, Task, Trajectory};

use crate::models::RandomWalkFactory;

/// 可执行单个副本的仿真模型
///
/// 结果只能取决于任务本身(包括 `seed`), 同一任务在任何Worker上重复执行
/// 都得到相同的轨迹。
pub trait SimulationModel: Send + Sync {
    fn simulate(&self, task: &Task) -> SimFarmResult<Trajectory>;
}

/// 从模型描述构造模型
pub trait ModelFactory: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self, artifact: &ModelArtifact) -> SimFarmResult<Arc<dyn SimulationModel>>;
}

/// 按名称查找的工厂表
pub struct ModelRegistry {
    factories: HashMap<String, Arc<dyn ModelFactory>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// 注册所有内置模型
    pub fn with_builtin_models() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RandomWalkFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn ModelFactory>) {
        info!(model = factory.name(), "注册模型工厂");
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn load(&self, artifact: &ModelArtifact) -> SimFarmResult<Arc<dyn SimulationModel>> {
        let factory = self
            .factories
            .get(&artifact.name)
            .ok_or_else(|| SimFarmError::ModelNotFound(artifact.name.clone()))?;
        factory.load(artifact)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_builtin_models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_loads_random_walk() {
        let registry = ModelRegistry::with_builtin_models();
        assert!(registry.contains("random-walk"));
        assert_eq!(registry.names(), vec!["random-walk".to_string()]);
        assert!(registry.load(&ModelArtifact::builtin("random-walk")).is_ok());
    }

    #[test]
    fn test_unknown_model_is_not_found() {
        let registry = ModelRegistry::with_builtin_models();
        let err = match registry.load(&ModelArtifact::builtin("lotka-volterra")) {
            Err(e) => e,
            Ok(_) => panic!("未注册的模型不应加载成功"),
        };
        assert!(matches!(err, SimFarmError::ModelNotFound(name) if name == "lotka-volterra"));
    }
}
