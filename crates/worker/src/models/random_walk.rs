//! 内置模型 `random-walk`: 带漂移的布朗运动
//!
//! 参数 `drift`、`volatility`、`initial`。默认值来自模型描述, 任务参数覆盖默认值。
//! `Dsl` 描述是若干 `name = value` 行, `Ir` 描述是参数名到数值的 JSON 对象。

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use simfarm_core::{
    ModelArtifact, ModelFormat, Sample, SimFarmError, SimFarmResult, Task, Trajectory,
};

use crate::model_registry::{ModelFactory, SimulationModel};

pub const RANDOM_WALK: &str = "random-walk";

pub struct RandomWalkFactory;

impl ModelFactory for RandomWalkFactory {
    fn name(&self) -> &str {
        RANDOM_WALK
    }

    fn load(&self, artifact: &ModelArtifact) -> SimFarmResult<Arc<dyn SimulationModel>> {
        let overrides = match artifact.format {
            ModelFormat::Builtin => BTreeMap::new(),
            ModelFormat::Dsl => parse_dsl(&artifact.source)?,
            ModelFormat::Ir => serde_json::from_slice(&artifact.source).map_err(|e| {
                SimFarmError::Configuration(format!("无法解析 {RANDOM_WALK} 的IR: {e}"))
            })?,
        };

        let mut model = RandomWalk::default();
        for (name, value) in overrides {
            match name.as_str() {
                "drift" => model.drift = value,
                "volatility" => model.volatility = value,
                "initial" => model.initial = value,
                other => {
                    return Err(SimFarmError::Configuration(format!(
                        "{RANDOM_WALK} 没有参数 {other}"
                    )))
                }
            }
        }
        if model.volatility < 0.0 {
            return Err(SimFarmError::Configuration("volatility 不能为负数".to_string()));
        }

        Ok(Arc::new(model))
    }
}

fn parse_dsl(source: &[u8]) -> SimFarmResult<BTreeMap<String, f64>> {
    let text = std::str::from_utf8(source)
        .map_err(|e| SimFarmError::Configuration(format!("模型源码不是UTF-8: {e}")))?;

    let mut parameters = BTreeMap::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once('=').ok_or_else(|| {
            SimFarmError::Configuration(format!("第 {} 行缺少 '=': {line}", index + 1))
        })?;
        let value: f64 = value.trim().parse().map_err(|e| {
            SimFarmError::Configuration(format!("第 {} 行的数值无效: {e}", index + 1))
        })?;
        parameters.insert(name.trim().to_string(), value);
    }
    Ok(parameters)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RandomWalk {
    pub drift: f64,
    pub volatility: f64,
    pub initial: f64,
}

impl Default for RandomWalk {
    fn default() -> Self {
        Self {
            drift: 0.0,
            volatility: 1.0,
            initial: 0.0,
        }
    }
}

impl SimulationModel for RandomWalk {
    fn simulate(&self, task: &Task) -> SimFarmResult<Trajectory> {
        if !(task.deadline.is_finite() && task.deadline >= 0.0) {
            return Err(SimFarmError::TaskExecution(format!(
                "{} 的截止时间无效: {}",
                task.id, task.deadline
            )));
        }

        let drift = task.parameter("drift").unwrap_or(self.drift);
        let volatility = task.parameter("volatility").unwrap_or(self.volatility);
        let mut value = task.parameter("initial").unwrap_or(self.initial);

        let mut rng = StdRng::seed_from_u64(task.seed);
        let steps = task.samples as usize;
        let dt = if steps == 0 {
            0.0
        } else {
            task.deadline / steps as f64
        };

        let mut samples = Vec::with_capacity(steps);
        for step in 1..=steps {
            value += drift * dt + volatility * dt.sqrt() * standard_normal(&mut rng);
            samples.push(Sample {
                time: dt * step as f64,
                values: vec![value],
            });
        }

        Ok(Trajectory { samples })
    }
}

/// Box-Muller
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
