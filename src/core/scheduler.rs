//! Strict-priority tenant scheduler with round robin inside each priority tier.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::tenant::TenantInfo;

/// Tenants sharing one priority, in insertion order, with a rotation cursor.
#[derive(Debug, Default)]
struct PriorityGroup {
    tenants: Vec<Arc<TenantInfo>>,
    cursor: usize,
}

impl PriorityGroup {
    fn remove(&mut self, id: &str) -> bool {
        let Some(idx) = self.tenants.iter().position(|t| t.id() == id) else {
            return false;
        };
        self.tenants.remove(idx);
        if idx < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.tenants.len() {
            self.cursor = 0;
        }
        true
    }

    fn advance_past(&mut self, idx: usize) {
        self.cursor = (idx + 1) % self.tenants.len();
    }
}

/// Chooses the tenant whose work runs next.
///
/// Higher priority always wins. Tenants of equal priority rotate in
/// insertion order, so a group of N returns to its first member only after
/// all N were returned once. One mutex covers group membership and cursors.
#[derive(Debug, Default)]
pub struct TenantScheduler {
    groups: Mutex<BTreeMap<Reverse<i32>, PriorityGroup>>,
}

impl TenantScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tenant into its priority group, moving it if it was already
    /// scheduled under a different record or priority.
    pub fn add_tenant(&self, info: Arc<TenantInfo>) {
        let mut groups = self.groups.lock();
        Self::remove_locked(&mut groups, info.id());
        groups
            .entry(Reverse(info.priority()))
            .or_default()
            .tenants
            .push(info);
    }

    /// Insert a tenant unless its id is already scheduled. Returns true if
    /// it was inserted. An existing entry keeps its place in the rotation.
    pub fn add_if_absent(&self, info: Arc<TenantInfo>) -> bool {
        let mut groups = self.groups.lock();
        if groups
            .values()
            .any(|g| g.tenants.iter().any(|t| t.id() == info.id()))
        {
            return false;
        }
        groups
            .entry(Reverse(info.priority()))
            .or_default()
            .tenants
            .push(info);
        true
    }

    /// Remove a tenant. Returns true if it was present.
    pub fn remove_tenant(&self, id: &str) -> bool {
        let mut groups = self.groups.lock();
        Self::remove_locked(&mut groups, id)
    }

    /// True if the tenant is scheduled.
    pub fn contains(&self, id: &str) -> bool {
        self.groups
            .lock()
            .values()
            .any(|g| g.tenants.iter().any(|t| t.id() == id))
    }

    /// Number of scheduled tenants.
    pub fn len(&self) -> usize {
        self.groups.lock().values().map(|g| g.tenants.len()).sum()
    }

    /// True if no tenant is scheduled.
    pub fn is_empty(&self) -> bool {
        self.groups.lock().is_empty()
    }

    /// Next tenant from the highest-priority group, or `None` if empty.
    pub fn schedule(&self) -> Option<Arc<TenantInfo>> {
        let mut groups = self.groups.lock();
        let group = groups.values_mut().find(|g| !g.tenants.is_empty())?;
        let idx = group.cursor % group.tenants.len();
        group.advance_past(idx);
        Some(Arc::clone(&group.tenants[idx]))
    }

    /// Like [`schedule`](Self::schedule), but only over tenants accepted by
    /// `eligible` (for example, those with pending work).
    ///
    /// The predicate runs outside the scheduler lock. Lower tiers are reached
    /// only when no tenant of a higher tier is eligible.
    pub fn schedule_where<F>(&self, mut eligible: F) -> Option<Arc<TenantInfo>>
    where
        F: FnMut(&TenantInfo) -> bool,
    {
        let rotations: Vec<(Reverse<i32>, Vec<Arc<TenantInfo>>)> = {
            let groups = self.groups.lock();
            groups
                .iter()
                .map(|(priority, group)| {
                    let n = group.tenants.len();
                    let rotated = (0..n)
                        .map(|offset| Arc::clone(&group.tenants[(group.cursor + offset) % n]))
                        .collect();
                    (*priority, rotated)
                })
                .collect()
        };

        let (priority, chosen) = rotations.into_iter().find_map(|(priority, tenants)| {
            tenants
                .into_iter()
                .find(|t| eligible(t))
                .map(|t| (priority, t))
        })?;

        let mut groups = self.groups.lock();
        if let Some(group) = groups.get_mut(&priority) {
            if let Some(idx) = group.tenants.iter().position(|t| Arc::ptr_eq(t, &chosen)) {
                group.advance_past(idx);
            }
        }
        Some(chosen)
    }

    fn remove_locked(groups: &mut BTreeMap<Reverse<i32>, PriorityGroup>, id: &str) -> bool {
        let Some(key) = groups
            .iter_mut()
            .find_map(|(key, group)| group.remove(id).then_some(*key))
        else {
            return false;
        };
        if groups.get(&key).is_some_and(|g| g.tenants.is_empty()) {
            groups.remove(&key);
        }
        true
    }
}
