use std::collections::{BTreeMap, HashMap};

use crate::models::ProcessRecord;

/// Parent pid -> ordered child pids for one snapshot.
///
/// Records whose parent is absent from the snapshot (or who have no parent at
/// all) hang off the `unknown` bucket, so the sum of all child lists plus the
/// bucket always equals the number of input records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessTree {
    children: BTreeMap<u32, Vec<u32>>,
    unknown: Vec<u32>,
}

impl ProcessTree {
    pub fn build(records: &[ProcessRecord]) -> Self {
        let present: std::collections::HashSet<u32> =
            records.iter().map(|record| record.pid).collect();
        let mut tree = Self::default();

        for record in records {
            match record.parent_pid {
                Some(ppid) if ppid != record.pid && present.contains(&ppid) => {
                    tree.children.entry(ppid).or_default().push(record.pid);
                }
                _ => tree.unknown.push(record.pid),
            }
        }

        for pids in tree.children.values_mut() {
            pids.sort_unstable();
        }
        tree.unknown.sort_unstable();
        tree
    }

    pub fn unknown_parent(&self) -> &[u32] {
        &self.unknown
    }

    /// True when `pid` sits in the unknown-parent bucket.
    pub fn is_unlinked(&self, pid: u32) -> bool {
        self.unknown.binary_search(&pid).is_ok()
    }

    /// Every resolved (parent, child) edge, parents ascending then children ascending.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.children
            .iter()
            .flat_map(|(parent, kids)| kids.iter().map(move |child| (*parent, *child)))
    }

    pub fn len(&self) -> usize {
        self.children.values().map(Vec::len).sum::<usize>() + self.unknown.len()
    }
}

/// Name lookup by pid over the same snapshot the tree was built from.
#[derive(Debug)]
pub struct ProcessIndex<'a> {
    by_pid: HashMap<u32, &'a ProcessRecord>,
}

impl<'a> ProcessIndex<'a> {
    pub fn new(records: &'a [ProcessRecord]) -> Self {
        Self {
            by_pid: records.iter().map(|record| (record.pid, record)).collect(),
        }
    }

    pub fn get(&self, pid: u32) -> Option<&'a ProcessRecord> {
        self.by_pid.get(&pid).copied()
    }

    pub fn name_of(&self, pid: u32) -> Option<&'a str> {
        self.get(pid).map(|record| record.name.as_str())
    }

    pub fn parent_of(&self, record: &ProcessRecord) -> Option<&'a ProcessRecord> {
        record
            .parent_pid
            .filter(|ppid| *ppid != record.pid)
            .and_then(|ppid| self.get(ppid))
    }
}
