//! 运行中的进度累积
//!
//! 以上次的远端状态为起点，每完成一个操作就登记对应条目。
//! 周期性上传到远端状态位置，中途失联时已上传的进度不会丢失。

use crate::core::state::{StateEntry, SyncState};
use std::collections::BTreeMap;

pub struct Checkpoint {
    entries: BTreeMap<String, StateEntry>,
    flush_threshold: usize,
    recorded: usize,
}

impl Checkpoint {
    pub fn new(seed: &SyncState, flush_threshold: usize) -> Self {
        let entries = seed
            .data
            .iter()
            .map(|e| (e.path().to_string(), e.clone()))
            .collect();

        Self {
            entries,
            flush_threshold,
            recorded: 0,
        }
    }

    /// 登记一个成功的操作，返回是否到了刷写的时候
    pub fn record(&mut self, entry: StateEntry) -> bool {
        self.entries.insert(entry.path().to_string(), entry);
        self.recorded += 1;
        self.flush_threshold > 0 && self.recorded % self.flush_threshold == 0
    }

    /// 本次运行登记的操作数
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_state(&self) -> SyncState {
        SyncState::new(self.entries.values().cloned().collect())
    }
}
