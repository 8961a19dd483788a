//! Function blacklist — suppresses job items that are known to fail.
//!
//! A node asks its `FunctionBlacklistQuery` before running each item; a
//! suppressed item is never invoked. When an item raises, the node tells its
//! `FunctionBlacklistMaintainer`, which decides what (if anything) to block.

use std::sync::Arc;

use dashmap::DashSet;
use vantage_core::{JobItem, TargetSpec};

pub trait FunctionBlacklistQuery: Send + Sync {
    fn is_blacklisted(&self, item: &JobItem) -> bool;
}

pub trait FunctionBlacklistMaintainer: Send + Sync {
    fn failed_job_item(&self, item: &JobItem);
}

/// Blocks nothing and ignores failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyBlacklist;

impl FunctionBlacklistQuery for EmptyBlacklist {
    fn is_blacklisted(&self, _item: &JobItem) -> bool {
        false
    }
}

impl FunctionBlacklistMaintainer for EmptyBlacklist {
    fn failed_job_item(&self, _item: &JobItem) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlacklistRule {
    /// The function everywhere.
    Function(String),
    /// Every function applied to the target.
    Target(TargetSpec),
    /// The function applied to one target.
    FunctionOnTarget(String, TargetSpec),
}

impl BlacklistRule {
    fn matches(&self, item: &JobItem) -> bool {
        match self {
            BlacklistRule::Function(f) => *f == item.function_id,
            BlacklistRule::Target(t) => *t == item.target,
            BlacklistRule::FunctionOnTarget(f, t) => *f == item.function_id && *t == item.target,
        }
    }
}

/// Rule set shared by every node that holds a clone. Failing items block
/// their function on their target.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBlacklist {
    rules: Arc<DashSet<BlacklistRule>>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, rule: BlacklistRule) -> bool {
        let added = self.rules.insert(rule.clone());
        if added {
            tracing::info!(?rule, "blacklist rule added");
        }
        added
    }

    pub fn remove(&self, rule: &BlacklistRule) -> bool {
        self.rules.remove(rule).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FunctionBlacklistQuery for InMemoryBlacklist {
    fn is_blacklisted(&self, item: &JobItem) -> bool {
        self.rules.iter().any(|r| r.matches(item))
    }
}

impl FunctionBlacklistMaintainer for InMemoryBlacklist {
    fn failed_job_item(&self, item: &JobItem) {
        self.add(BlacklistRule::FunctionOnTarget(item.function_id.clone(), item.target.clone()));
    }
}
