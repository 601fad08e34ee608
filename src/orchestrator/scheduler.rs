// src/orchestrator/scheduler.rs

//! Task state machine
//!
//! `Pending -> Ready -> Running -> {Succeeded, Failed}` and
//! `Pending -> Blocked`. A task is settled only once every predecessor has
//! reached a final state; it then becomes Ready if they all succeeded and
//! Blocked otherwise. Blocking is therefore discovered as builds finish,
//! never ahead of time.
//!
//! A target carrying resolution errors behaves as if it had an extra
//! predecessor that already failed: it is Blocked as soon as its real
//! predecessors are final. The dependency strings that did not resolve
//! are kept apart from `blocked_by`, which only ever names tasks.
//! Dependents of such a target list the target itself.

use crate::plan::BuildPlan;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Blocked,
}

impl TaskState {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Blocked)
    }

    fn is_bad(&self) -> bool {
        matches!(self, Self::Failed | Self::Blocked)
    }
}

#[derive(Debug)]
pub struct Scheduler {
    states: BTreeMap<String, TaskState>,
    /// Predecessors not yet final
    remaining: BTreeMap<String, usize>,
    /// Failed or blocked predecessors, transitively
    blocked_by: BTreeMap<String, BTreeSet<String>>,
    /// Dependency strings of a target that did not resolve
    unresolved: BTreeMap<String, Vec<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
    ready: VecDeque<String>,
    newly_blocked: Vec<String>,
}

impl Scheduler {
    pub fn new(plan: &BuildPlan) -> Self {
        let mut scheduler = Self {
            states: BTreeMap::new(),
            remaining: BTreeMap::new(),
            blocked_by: BTreeMap::new(),
            unresolved: BTreeMap::new(),
            dependents: BTreeMap::new(),
            ready: VecDeque::new(),
            newly_blocked: Vec::new(),
        };

        for target in plan.targets() {
            scheduler.states.insert(target.name.clone(), TaskState::Pending);
            scheduler
                .remaining
                .insert(target.name.clone(), target.predecessors.len());

            if !target.unresolved.is_empty() {
                let missing: BTreeSet<&str> =
                    target.unresolved.iter().map(|e| e.dependency()).collect();
                scheduler.unresolved.insert(
                    target.name.clone(),
                    missing.into_iter().map(str::to_string).collect(),
                );
            }

            for pred in &target.predecessors {
                scheduler
                    .dependents
                    .entry(pred.clone())
                    .or_default()
                    .insert(target.name.clone());
            }
        }

        let roots: Vec<String> = scheduler
            .remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| name.clone())
            .collect();
        for name in roots {
            if scheduler.settle(&name) {
                scheduler.release(&name);
            }
        }

        scheduler
    }

    pub fn state(&self, name: &str) -> Option<TaskState> {
        self.states.get(name).copied()
    }

    /// Take the next Ready task and mark it Running
    pub fn next_ready(&mut self) -> Option<String> {
        let name = self.ready.pop_front()?;
        self.states.insert(name.clone(), TaskState::Running);
        Some(name)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Record the outcome of a Running task and settle what it unblocks
    pub fn complete(&mut self, name: &str, success: bool) {
        if self.states.get(name) != Some(&TaskState::Running) {
            return;
        }
        let state = if success {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        self.states.insert(name.to_string(), state);
        self.release(name);
    }

    /// Tasks that became Blocked since the last call, with their blockers
    pub fn take_newly_blocked(&mut self) -> Vec<(String, Vec<String>)> {
        std::mem::take(&mut self.newly_blocked)
            .into_iter()
            .map(|name| {
                let blockers = self.blocked_by(&name);
                (name, blockers)
            })
            .collect()
    }

    /// Sorted blockers of a task
    pub fn blocked_by(&self, name: &str) -> Vec<String> {
        self.blocked_by
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sorted dependency strings of a task that did not resolve
    pub fn unresolved(&self, name: &str) -> Vec<String> {
        self.unresolved.get(name).cloned().unwrap_or_default()
    }

    /// Tasks that never started: Pending or Ready
    pub fn unstarted(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, state)| matches!(state, TaskState::Pending | TaskState::Ready))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.states.values().all(TaskState::is_final)
    }

    /// Propagate a final state to dependents
    fn release(&mut self, finished: &str) {
        let mut worklist = vec![finished.to_string()];

        while let Some(name) = worklist.pop() {
            let bad = self.states.get(&name).is_some_and(TaskState::is_bad);
            let inherited: BTreeSet<String> = if bad {
                let mut set = self.blocked_by.get(&name).cloned().unwrap_or_default();
                set.insert(name.clone());
                set
            } else {
                BTreeSet::new()
            };

            let dependents = self.dependents.get(&name).cloned().unwrap_or_default();
            for dependent in dependents {
                if let Some(count) = self.remaining.get_mut(&dependent) {
                    *count = count.saturating_sub(1);
                }
                if bad {
                    self.blocked_by
                        .entry(dependent.clone())
                        .or_default()
                        .extend(inherited.iter().cloned());
                }
                if self.remaining.get(&dependent) == Some(&0) && self.settle(&dependent) {
                    worklist.push(dependent);
                }
            }
        }
    }

    /// Move a task with no outstanding predecessors out of Pending
    ///
    /// Returns true if it became Blocked and must be released in turn.
    fn settle(&mut self, name: &str) -> bool {
        if self.states.get(name) != Some(&TaskState::Pending) {
            return false;
        }
        let blocked = self.blocked_by.get(name).is_some_and(|set| !set.is_empty())
            || self.unresolved.contains_key(name);
        if blocked {
            self.states.insert(name.to_string(), TaskState::Blocked);
            self.newly_blocked.push(name.to_string());
            true
        } else {
            self.states.insert(name.to_string(), TaskState::Ready);
            self.ready.push_back(name.to_string());
            false
        }
    }
}
