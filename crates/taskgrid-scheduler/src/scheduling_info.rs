//! Per-action scheduling metadata.
//!
//! Resource-level edges live here, apart from the data edges kept on the
//! action itself. A resource edge `P -> S` means that `S` was placed in a
//! gap that only opens when `P` finishes on the same worker.

use crate::action::ActionId;

#[derive(Debug, Clone, Default)]
pub struct SchedulingInformation {
    enforced_target: Option<String>,
    constraining_predecessors: Vec<ActionId>,
    resource_predecessors: Vec<ActionId>,
    resource_successors: Vec<ActionId>,
    expected_start: i64,
    expected_end: i64,
}

impl SchedulingInformation {
    /// Only this worker may ever host the action.
    pub fn enforced_target(&self) -> Option<&str> {
        self.enforced_target.as_deref()
    }

    pub fn set_enforced_target(&mut self, worker: impl Into<String>) {
        self.enforced_target = Some(worker.into());
    }

    /// Predecessors whose worker this action must share.
    pub fn constraining_predecessors(&self) -> &[ActionId] {
        &self.constraining_predecessors
    }

    pub fn add_constraining_predecessor(&mut self, id: ActionId) {
        if !self.constraining_predecessors.contains(&id) {
            self.constraining_predecessors.push(id);
        }
    }

    // ── Resource edges ─────────────────────────────────────────────

    pub fn resource_predecessors(&self) -> &[ActionId] {
        &self.resource_predecessors
    }

    pub fn resource_successors(&self) -> &[ActionId] {
        &self.resource_successors
    }

    pub fn add_resource_predecessor(&mut self, id: ActionId) {
        if !self.resource_predecessors.contains(&id) {
            self.resource_predecessors.push(id);
        }
    }

    pub fn remove_resource_predecessor(&mut self, id: ActionId) {
        self.resource_predecessors.retain(|p| *p != id);
    }

    pub fn add_resource_successor(&mut self, id: ActionId) {
        if !self.resource_successors.contains(&id) {
            self.resource_successors.push(id);
        }
    }

    pub fn remove_resource_successor(&mut self, id: ActionId) {
        self.resource_successors.retain(|s| *s != id);
    }

    pub fn take_resource_predecessors(&mut self) -> Vec<ActionId> {
        std::mem::take(&mut self.resource_predecessors)
    }

    pub fn take_resource_successors(&mut self) -> Vec<ActionId> {
        std::mem::take(&mut self.resource_successors)
    }

    /// No resource predecessor is pending.
    pub fn is_executable(&self) -> bool {
        self.resource_predecessors.is_empty()
    }

    // ── Estimates ──────────────────────────────────────────────────

    pub fn expected_start(&self) -> i64 {
        self.expected_start
    }

    pub fn expected_end(&self) -> i64 {
        self.expected_end
    }

    pub fn set_expectations(&mut self, start: i64, end: i64) {
        self.expected_start = start;
        self.expected_end = end.max(start);
    }

    /// Forget everything tied to the current worker; enforcement and
    /// constraints survive.
    pub fn reset(&mut self) {
        self.resource_predecessors.clear();
        self.resource_successors.clear();
        self.expected_start = 0;
        self.expected_end = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executable_without_resource_predecessors() {
        let mut info = SchedulingInformation::default();
        assert!(info.is_executable());
        info.add_resource_predecessor(ActionId::new(1));
        info.add_resource_predecessor(ActionId::new(1));
        assert_eq!(info.resource_predecessors().len(), 1);
        assert!(!info.is_executable());
        info.remove_resource_predecessor(ActionId::new(1));
        assert!(info.is_executable());
    }

    #[test]
    fn reset_keeps_enforcement() {
        let mut info = SchedulingInformation::default();
        info.set_enforced_target("w1");
        info.add_constraining_predecessor(ActionId::new(3));
        info.add_resource_successor(ActionId::new(4));
        info.set_expectations(10, 5);
        assert_eq!(info.expected_end(), 10);

        info.reset();
        assert_eq!(info.enforced_target(), Some("w1"));
        assert_eq!(info.constraining_predecessors(), &[ActionId::new(3)]);
        assert!(info.resource_successors().is_empty());
    }
}
