//! Group index: routes record contributions to groups addressed by path.
//!
//! Groups live in an arena of slots indexed by path. A record placed at path
//! `[k1, k2]` is a member of `[]`, `[k1]` and `[k1, k2]`; each of those
//! groups folds in the aggregates attached at its level. A group is created
//! on its first member and destroyed when its member set becomes empty, so
//! ancestors are discarded transitively once their last descendant leaves.
//!
//! The contributions added for each record are remembered, so a removal
//! subtracts exactly what was added even if key or value functions would
//! now return something else.

use crate::aggregate::{AggregateState, Contribution};
use crate::config::PipelineConfig;
use crate::definition::Layout;
use crate::property;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::vec::Vec;
use hashbrown::HashMap;
use tally_core::{RecordId, Value};

/// Ordered sequence of keys identifying a group, one per grouping level.
pub type GroupPath = Vec<Value>;

type GroupId = usize;

/// Read-only snapshot of one group.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupSummary {
    /// Path of the group
    pub path: GroupPath,
    /// Number of member records
    pub members: usize,
    /// Aggregate and summary property results by name; `None` marks an
    /// empty result
    pub aggregates: BTreeMap<String, Option<Value>>,
}

impl GroupSummary {
    /// Grouping level: 0 for the root group.
    #[inline]
    pub fn level(&self) -> usize {
        self.path.len()
    }

    /// Result of a named aggregate, `None` if absent or empty.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.aggregates.get(name).and_then(Option::as_ref)
    }

    /// True if the aggregate exists and currently has no result.
    pub fn is_empty_aggregate(&self, name: &str) -> bool {
        matches!(self.aggregates.get(name), Some(None))
    }
}

struct Group {
    path: GroupPath,
    parent: Option<GroupId>,
    members: BTreeSet<RecordId>,
    children: BTreeMap<Value, GroupId>,
    states: Vec<AggregateState>,
}

/// Where a record was routed and what it contributed at each level.
struct Placement {
    path: GroupPath,
    contributions: Vec<Vec<Contribution>>,
}

/// Sampling state for the inverse-law check on custom aggregates.
#[derive(Default)]
struct InverseCheck {
    interval: Option<u32>,
    adds: u64,
    violations: u64,
}

impl InverseCheck {
    /// Counts an add into a custom aggregate; true on every n-th one.
    fn due(&mut self, state: &AggregateState) -> bool {
        match (self.interval, state.as_custom()) {
            (Some(n), Some(_)) if n > 0 => {
                self.adds += 1;
                self.adds % n as u64 == 0
            }
            _ => false,
        }
    }

    /// Runs `add(v); remove(v)` on a fork of the aggregate. Counts and
    /// returns false if the result changed.
    fn holds(&mut self, state: &AggregateState, value: &Value) -> bool {
        let Some(mut copy) = state.as_custom().and_then(|agg| agg.fork()) else {
            return true;
        };
        let before = copy.result();
        copy.add(value);
        copy.remove(value);
        if copy.result() == before {
            return true;
        }
        self.violations += 1;
        false
    }
}

/// Arena of groups for one pipeline stage.
pub struct GroupIndex {
    layout: Layout,
    slots: Vec<Option<Group>>,
    free: Vec<GroupId>,
    by_path: HashMap<GroupPath, GroupId>,
    placements: HashMap<RecordId, Placement>,
    check: InverseCheck,
}

impl GroupIndex {
    /// Creates an empty index for the given aggregate layout.
    pub fn new(layout: Layout, config: &PipelineConfig) -> Self {
        Self {
            layout,
            slots: Vec::new(),
            free: Vec::new(),
            by_path: HashMap::new(),
            placements: HashMap::new(),
            check: InverseCheck {
                interval: config.inverse_check_interval,
                ..InverseCheck::default()
            },
        }
    }

    /// Routes a record's contributions to every group along `path`,
    /// creating groups on demand.
    ///
    /// `contributions[level]` must align with the layout's aggregates at
    /// that level. The record must not already be placed.
    pub fn place(&mut self, id: RecordId, path: GroupPath, contributions: Vec<Vec<Contribution>>) {
        debug_assert!(!self.placements.contains_key(&id), "record {} placed twice", id);
        let mut parent = None;
        for level in 0..=path.len() {
            let gid = self.get_or_create(&path[..level], parent);
            let Self {
                slots,
                check,
                layout,
                ..
            } = &mut *self;
            if let Some(group) = slots.get_mut(gid).and_then(Option::as_mut) {
                group.members.insert(id);
                if let Some(level_contributions) = contributions.get(level) {
                    let states = group.states.iter_mut();
                    for (i, (state, c)) in states.zip(level_contributions).enumerate() {
                        if check.due(state) && !check.holds(state, &c.value) {
                            let name = layout
                                .levels
                                .get(level)
                                .and_then(|specs| specs.get(i))
                                .map(|s| s.name.as_str());
                            tracing::warn!(
                                aggregate = name,
                                value = ?c.value,
                                "commutative aggregate remove did not invert add"
                            );
                        }
                        state.add(c);
                    }
                }
            }
            parent = Some(gid);
        }
        tracing::trace!(record = id, path = ?path, "placed");
        self.placements.insert(id, Placement { path, contributions });
    }

    /// Removes a record's contributions from every group along its path,
    /// leaf first, destroying groups left without members. Returns the path
    /// the record was placed at.
    pub fn unplace(&mut self, id: RecordId) -> Option<GroupPath> {
        let placement = self.placements.remove(&id)?;
        for level in (0..=placement.path.len()).rev() {
            let Some(&gid) = self.by_path.get(&placement.path[..level]) else {
                continue;
            };
            let emptied = match self.slots.get_mut(gid).and_then(Option::as_mut) {
                Some(group) => {
                    if let Some(level_contributions) = placement.contributions.get(level) {
                        for (state, c) in group.states.iter_mut().zip(level_contributions) {
                            state.remove(c);
                        }
                    }
                    group.members.remove(&id);
                    group.members.is_empty()
                }
                None => false,
            };
            if emptied {
                self.destroy(gid);
            }
        }
        tracing::trace!(record = id, path = ?placement.path, "unplaced");
        Some(placement.path)
    }

    /// Returns true if the record is placed in this index.
    #[inline]
    pub fn contains(&self, id: RecordId) -> bool {
        self.placements.contains_key(&id)
    }

    /// Path a record is currently placed at.
    pub fn path_of(&self, id: RecordId) -> Option<&[Value]> {
        self.placements.get(&id).map(|p| p.path.as_slice())
    }

    /// Number of placed records.
    #[inline]
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    /// Returns true if no record is placed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Number of live groups across all levels.
    #[inline]
    pub fn group_count(&self) -> usize {
        self.by_path.len()
    }

    /// Swaps the summary properties for those of `layout`. The aggregates of
    /// `layout` must match the current ones.
    pub fn relayout(&mut self, layout: Layout) {
        debug_assert_eq!(
            layout.levels.iter().map(Vec::len).collect::<Vec<_>>(),
            self.layout.levels.iter().map(Vec::len).collect::<Vec<_>>(),
            "aggregate layout changed"
        );
        self.layout = layout;
    }

    /// Inverse-law violations detected by sampling.
    #[inline]
    pub fn inverse_violations(&self) -> u64 {
        self.check.violations
    }

    /// Summary of the group at `path`, if it exists.
    pub fn summary(&self, path: &[Value]) -> Option<GroupSummary> {
        self.group_at(path).map(|g| self.summarize(g))
    }

    /// Keys of the child groups under `path`, in key order.
    pub fn children(&self, path: &[Value]) -> Vec<Value> {
        self.group_at(path)
            .map(|g| g.children.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Member identities of the group at `path`, in identity order.
    pub fn members(&self, path: &[Value]) -> Vec<RecordId> {
        self.group_at(path)
            .map(|g| g.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Summaries of the group at `prefix` and all of its descendants.
    pub fn query(&self, prefix: &[Value]) -> BTreeMap<GroupPath, GroupSummary> {
        let mut out = BTreeMap::new();
        let mut pending: Vec<GroupId> = self.by_path.get(prefix).copied().into_iter().collect();
        while let Some(gid) = pending.pop() {
            if let Some(group) = self.slots.get(gid).and_then(Option::as_ref) {
                pending.extend(group.children.values().copied());
                out.insert(group.path.clone(), self.summarize(group));
            }
        }
        out
    }

    fn group_at(&self, path: &[Value]) -> Option<&Group> {
        let gid = *self.by_path.get(path)?;
        self.slots.get(gid).and_then(Option::as_ref)
    }

    fn summarize(&self, group: &Group) -> GroupSummary {
        let level = group.path.len();
        let specs = self.layout.levels.get(level);
        let aggregates = group
            .states
            .iter()
            .enumerate()
            .filter_map(|(i, state)| {
                specs
                    .and_then(|s| s.get(i))
                    .map(|spec| (spec.name.clone(), state.result()))
            })
            .collect();
        let mut summary = GroupSummary {
            path: group.path.clone(),
            members: group.members.len(),
            aggregates,
        };
        if let Some(properties) = self.layout.properties.get(level) {
            property::summarize(&mut summary, properties);
        }
        summary
    }

    fn get_or_create(&mut self, path: &[Value], parent: Option<GroupId>) -> GroupId {
        if let Some(&gid) = self.by_path.get(path) {
            return gid;
        }

        let states = self
            .layout
            .levels
            .get(path.len())
            .map(|specs| specs.iter().map(|s| AggregateState::new(&s.kind)).collect())
            .unwrap_or_default();
        let group = Group {
            path: path.to_vec(),
            parent,
            members: BTreeSet::new(),
            children: BTreeMap::new(),
            states,
        };

        let gid = match self.free.pop() {
            Some(gid) => {
                self.slots[gid] = Some(group);
                gid
            }
            None => {
                self.slots.push(Some(group));
                self.slots.len() - 1
            }
        };
        self.by_path.insert(path.to_vec(), gid);

        if let (Some(pid), Some(key)) = (parent, path.last()) {
            if let Some(p) = self.slots.get_mut(pid).and_then(Option::as_mut) {
                p.children.insert(key.clone(), gid);
            }
        }
        tracing::debug!(path = ?path, "group created");
        gid
    }

    fn destroy(&mut self, gid: GroupId) {
        let Some(group) = self.slots.get_mut(gid).and_then(Option::take) else {
            return;
        };
        self.by_path.remove(&group.path);
        if let (Some(pid), Some(key)) = (group.parent, group.path.last()) {
            if let Some(p) = self.slots.get_mut(pid).and_then(Option::as_mut) {
                p.children.remove(key);
            }
        }
        self.free.push(gid);
        tracing::debug!(path = ?group.path, "group destroyed");
    }
}
