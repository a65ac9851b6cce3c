//! 计划依赖图
//!
//! 入度表驱动的就绪调度：依赖全部成功的步骤才可派发；前置失败时其后继
//! 被连锁标记为跳过，而非尝试执行。

use std::collections::HashMap;

use crate::plan::types::PlanStep;

/// 节点调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Waiting,
    Running,
    /// 已结束（true = 成功）
    Done(bool),
    /// 因前置失败被跳过
    Skipped,
}

/// 依赖图：按步骤编号维护入度与后继
pub struct PlanGraph {
    in_degree: HashMap<u32, usize>,
    dependents: HashMap<u32, Vec<u32>>,
    states: HashMap<u32, NodeState>,
}

impl PlanGraph {
    pub fn new(steps: &[PlanStep]) -> Self {
        let mut in_degree = HashMap::new();
        let mut dependents: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut states = HashMap::new();

        for step in steps {
            in_degree.insert(step.id, step.depends_on.len());
            states.insert(step.id, NodeState::Waiting);
            for &dep in &step.depends_on {
                dependents.entry(dep).or_default().push(step.id);
            }
        }

        Self {
            in_degree,
            dependents,
            states,
        }
    }

    /// 当前可派发的步骤编号（入度 0 且仍在等待），按编号升序
    pub fn ready(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .in_degree
            .iter()
            .filter(|(id, degree)| {
                **degree == 0 && self.states.get(*id) == Some(&NodeState::Waiting)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn mark_running(&mut self, id: u32) {
        if let Some(s) = self.states.get_mut(&id) {
            *s = NodeState::Running;
        }
    }

    /// 记录一个步骤结束。成功则为后继减入度；失败则把所有（传递）后继标记为 Skipped。
    /// 返回因此次失败而被跳过的步骤编号（升序）。
    pub fn mark_finished(&mut self, id: u32, success: bool) -> Vec<u32> {
        self.states.insert(id, NodeState::Done(success));
        let mut skipped = Vec::new();

        if success {
            if let Some(deps) = self.dependents.get(&id) {
                for dep_id in deps.clone() {
                    if let Some(degree) = self.in_degree.get_mut(&dep_id) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
            return skipped;
        }

        // 失败连锁：BFS 标记全部传递后继
        let mut queue = vec![id];
        while let Some(cur) = queue.pop() {
            if let Some(deps) = self.dependents.get(&cur) {
                for dep_id in deps.clone() {
                    if self.states.get(&dep_id) == Some(&NodeState::Waiting) {
                        self.states.insert(dep_id, NodeState::Skipped);
                        skipped.push(dep_id);
                        queue.push(dep_id);
                    }
                }
            }
        }
        skipped.sort_unstable();
        skipped
    }

    /// 仍在等待或执行中的步骤编号（用户取消时这些被记为取消）
    pub fn unfinished(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .states
            .iter()
            .filter(|(_, s)| matches!(s, NodeState::Waiting | NodeState::Running))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// 是否全部步骤已进入终态（Done 或 Skipped）
    pub fn exhausted(&self) -> bool {
        self.states
            .values()
            .all(|s| matches!(s, NodeState::Done(_) | NodeState::Skipped))
    }

    pub fn state(&self, id: u32) -> Option<NodeState> {
        self.states.get(&id).copied()
    }
}
