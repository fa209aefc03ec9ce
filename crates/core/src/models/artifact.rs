use serde::{Deserialize, Serialize};

/// 模型描述的格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFormat {
    /// Worker内置模型, 只按名称查找
    Builtin,
    /// 领域语言源码, 由Worker端的模型工厂编译
    Dsl,
    /// 结构化中间表示
    Ir,
}

/// 在网络上传输的模型描述
///
/// 只包含数据, 从不包含可执行代码。Worker根据 `name` 在自己注册的
/// 模型工厂中查找并加载。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub format: ModelFormat,
    pub source: Vec<u8>,
}

impl ModelArtifact {
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: ModelFormat::Builtin,
            source: Vec::new(),
        }
    }

    pub fn dsl(name: impl Into<String>, source: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            format: ModelFormat::Dsl,
            source: source.into(),
        }
    }
}
