use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ReplicaResult, Task, TaskId};
use crate::errors::{SimFarmError, SimFarmResult};

/// 客户端提交的一次仿真请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationDataSet {
    pub model_name: String,
    pub replicas: u32,
    pub deadline: f64,
    pub samples: u32,
    pub seed: u64,
    pub parameters: BTreeMap<String, f64>,
}

impl SimulationDataSet {
    pub fn new(model_name: impl Into<String>, replicas: u32) -> Self {
        Self {
            model_name: model_name.into(),
            replicas,
            deadline: 10.0,
            samples: 10,
            seed: 0,
            parameters: BTreeMap::new(),
        }
    }

    /// 截止时间必须是有限的非负数, 否则每个副本都会被Worker拒绝
    pub fn validate(&self) -> SimFarmResult<()> {
        if !(self.deadline.is_finite() && self.deadline >= 0.0) {
            return Err(SimFarmError::Configuration(format!(
                "仿真截止时间无效: {}",
                self.deadline
            )));
        }
        if let Some((name, value)) = self.parameters.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SimFarmError::Configuration(format!(
                "模型参数 {name} 无效: {value}"
            )));
        }
        Ok(())
    }

    /// 展开为 `replicas` 个相互独立的任务
    ///
    /// 每个副本的种子只取决于请求种子和副本序号, 所以重复展开得到完全相同的任务。
    pub fn expand(&self) -> Vec<Task> {
        (0..self.replicas)
            .map(|replica| Task {
                id: TaskId(replica as u64),
                replica,
                seed: derive_seed(self.seed, replica),
                deadline: self.deadline,
                samples: self.samples,
                parameters: self.parameters.clone(),
            })
            .collect()
    }
}

/// splitmix64
fn derive_seed(base: u64, replica: u32) -> u64 {
    let mut z = base.wrapping_add((replica as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// 一次运行的汇总结果, 通过 RESULTS 发送给客户端
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub submitted: usize,
    pub completed: usize,
    /// 因Worker全部失效而放弃的任务数
    pub abandoned: usize,
    pub removed_workers: Vec<String>,
    pub results: Vec<ReplicaResult>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.abandoned == 0 && self.completed == self.submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_is_deterministic() {
        let mut dataset = SimulationDataSet::new("random-walk", 5);
        dataset.seed = 99;
        dataset.parameters.insert("drift".to_string(), 0.1);

        let first = dataset.expand();
        let second = dataset.expand();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);

        let ids: Vec<u64> = first.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);

        let mut seeds: Vec<u64> = first.iter().map(|t| t.seed).collect();
        seeds.sort_unstable();
        seeds.dedup();
        assert_eq!(seeds.len(), 5, "每个副本的种子应当不同");
        assert!(first.iter().all(|t| t.parameter("drift") == Some(0.1)));
    }

    #[test]
    fn test_validate_rejects_bad_deadline_and_parameters() {
        let mut dataset = SimulationDataSet::new("random-walk", 5);
        assert!(dataset.validate().is_ok());

        dataset.deadline = -1.0;
        assert!(dataset.validate().is_err());
        dataset.deadline = f64::NAN;
        assert!(dataset.validate().is_err());

        dataset.deadline = 0.0;
        assert!(dataset.validate().is_ok());
        dataset.parameters.insert("drift".to_string(), f64::INFINITY);
        let err = dataset.validate().unwrap_err();
        assert!(err.to_string().contains("drift"));
    }

    #[test]
    fn test_report_completeness() {
        let report = RunReport {
            submitted: 4,
            completed: 4,
            ..Default::default()
        };
        assert!(report.is_complete());

        let partial = RunReport {
            submitted: 4,
            completed: 1,
            abandoned: 3,
            ..Default::default()
        };
        assert!(!partial.is_complete());
    }
}
