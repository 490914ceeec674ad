use std::sync::Arc;

/// Transition reported by an [`ActivationGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// The listener count went from zero to one
    Active,
    /// The listener count went back to zero
    Desactive,
}

/// Reference-counted gate that only reports transitions.
///
/// Feeding it the same side of zero twice yields nothing; only the
/// 0 -> 1 and 1 -> 0 crossings produce an [`Edge`].
#[derive(Debug, Default)]
pub struct ActivationGate {
    active: bool,
}

impl ActivationGate {
    /// Whether the last observed listener count was non-zero.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Records the current listener count and reports a crossing, if any.
    pub fn observe(&mut self, listeners: usize) -> Option<Edge> {
        let active = listeners > 0;
        if self.active == active {
            return None;
        }

        self.active = active;
        Some(if active { Edge::Active } else { Edge::Desactive })
    }
}

pub(super) type Hook = Arc<dyn Fn() + Send + Sync>;

/// Hooks run on each gate crossing, in registration order.
#[derive(Default)]
pub(super) struct EdgeHooks {
    next_id: u64,
    on_active: Vec<(u64, Hook)>,
    on_desactive: Vec<(u64, Hook)>,
}

impl EdgeHooks {
    pub(super) fn add(&mut self, edge: Edge, hook: Hook) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.list_mut(edge).push((id, hook));
        id
    }

    pub(super) fn remove(&mut self, edge: Edge, id: u64) {
        self.list_mut(edge).retain(|(hook_id, _)| *hook_id != id);
    }

    pub(super) fn snapshot(&self, edge: Edge) -> Vec<Hook> {
        let list = match edge {
            Edge::Active => &self.on_active,
            Edge::Desactive => &self.on_desactive,
        };
        list.iter().map(|(_, hook)| Arc::clone(hook)).collect()
    }

    fn list_mut(&mut self, edge: Edge) -> &mut Vec<(u64, Hook)> {
        match edge {
            Edge::Active => &mut self.on_active,
            Edge::Desactive => &mut self.on_desactive,
        }
    }
}
