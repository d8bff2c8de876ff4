//! Groups and run-level aggregates.
//!
//! A Group owns the jobs for one classification key plus the working
//! directory their files land in. The run's group map is a `BTreeMap` keyed
//! by [`GroupKey`], so iteration order is deterministic rather than
//! hash-map order.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::classify::{sanitize_title, ClassifiedItem};

use super::job::{job_id, Job};

/// Composite classification key: category plus module subgroup
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    /// Subject category (e.g. "Signals", or the "Uncategorized" fallback)
    pub category: String,

    /// Module code extracted from the title (e.g. "M01", or "MISC")
    pub subgroup: String,
}

impl GroupKey {
    pub fn new(category: impl Into<String>, subgroup: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            subgroup: subgroup.into(),
        }
    }

    /// Filesystem-safe stem used for the group directory and archive name
    pub fn archive_stem(&self) -> String {
        sanitize_title(&format!("{}_{}", self.category, self.subgroup))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.subgroup)
    }
}

/// One admitted item: the classified entry and its job
#[derive(Debug, Clone)]
pub struct GroupItem {
    pub item: ClassifiedItem,
    pub job: Job,
}

impl GroupItem {
    /// File name of the transcoded output within the group directory
    pub fn file_name(&self) -> String {
        format!("{}.mp4", self.item.sanitized_name)
    }
}

/// All jobs sharing one classification key, plus their working directory
#[derive(Debug, Clone)]
pub struct Group {
    pub key: GroupKey,

    /// Directory owned exclusively by this group; removed once the group's
    /// archive has been delivered (or at run cleanup)
    pub work_dir: PathBuf,

    items: Vec<GroupItem>,
}

impl Group {
    pub fn new(key: GroupKey, work_dir: PathBuf) -> Self {
        Self {
            key,
            work_dir,
            items: Vec::new(),
        }
    }

    /// Admit a classified item, resolving sanitized-name collisions by
    /// numeric suffixing so no two items share an archive entry name.
    pub fn admit(&mut self, mut item: ClassifiedItem) {
        let base = item.sanitized_name.clone();
        let mut candidate = base.clone();
        let mut n = 1usize;

        while self
            .items
            .iter()
            .any(|gi| gi.item.sanitized_name.eq_ignore_ascii_case(&candidate))
        {
            n += 1;
            candidate = format!("{} ({})", base, n);
        }
        item.sanitized_name = candidate;

        let job = Job::new(job_id(&item.entry.raw_title, &item.entry.url));
        self.items.push(GroupItem { item, job });
    }

    pub fn items(&self) -> &[GroupItem] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [GroupItem] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items whose jobs still hold a local file (archive membership)
    pub fn retained(&self) -> impl Iterator<Item = &GroupItem> {
        self.items.iter().filter(|gi| gi.job.is_retained())
    }
}

/// Aggregate counters for one run. Updated only by the orchestrator's
/// control loop, never from worker tasks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunTotals {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Process-scoped aggregate for one manifest
#[derive(Debug)]
pub struct PipelineRun {
    pub id: Uuid,

    /// Run-scoped working directory; group directories live beneath it
    pub work_dir: PathBuf,

    pub groups: BTreeMap<GroupKey, Group>,

    pub totals: RunTotals,
}

impl PipelineRun {
    pub fn new(id: Uuid, work_dir: PathBuf) -> Self {
        Self {
            id,
            work_dir,
            groups: BTreeMap::new(),
            totals: RunTotals::default(),
        }
    }

    /// Route a classified item to its group, creating the group lazily
    pub fn admit(&mut self, item: ClassifiedItem) {
        let key = item.group_key.clone();
        let work_dir = self.work_dir.join(key.archive_stem());

        self.groups
            .entry(key.clone())
            .or_insert_with(|| Group::new(key, work_dir))
            .admit(item);
    }

    /// Total jobs across all groups
    pub fn job_count(&self) -> usize {
        self.groups.values().map(Group::len).sum()
    }
}
