//! Topology reconciliation: keep the live link set equal to the schedule.
//!
//! The diff is pure set algebra over canonical edges; applying it goes
//! through the [`NetworkControl`] interface, removals first.

use islnet_env::{ControlError, Edge, LinkHandle, NetworkControl, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::schedule::Snapshot;

/// The minimal change set turning a live graph into a desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    /// Edges to create (`desired - live`)
    pub added: BTreeSet<Edge>,

    /// Edges to delete (`live - desired`)
    pub removed: BTreeSet<Edge>,
}

impl ReconciliationResult {
    /// True when the live graph already matches.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Computes the add/remove sets between `desired` and `live`.
pub fn reconcile(desired: &BTreeSet<Edge>, live: &BTreeSet<Edge>) -> ReconciliationResult {
    ReconciliationResult {
        added: desired.difference(live).copied().collect(),
        removed: live.difference(desired).copied().collect(),
    }
}

/// The links currently realized in the substrate.
///
/// Owned by the driver and only mutated through [`Reconciler::apply`].
#[derive(Debug, Clone, Default)]
pub struct LiveTopology {
    links: BTreeMap<Edge, LinkHandle>,

    /// Interfaces of live links that are known not to be up
    down: BTreeSet<String>,
}

impl LiveTopology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts the links reported by the substrate. Their interfaces are
    /// assumed to be up.
    pub fn from_links(links: BTreeMap<Edge, LinkHandle>) -> Self {
        Self {
            links,
            down: BTreeSet::new(),
        }
    }

    /// Current edge set.
    pub fn edges(&self) -> BTreeSet<Edge> {
        self.links.keys().copied().collect()
    }

    pub fn contains(&self, edge: &Edge) -> bool {
        self.links.contains_key(edge)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Handle backing `edge`, if live.
    pub fn handle(&self, edge: &Edge) -> Option<&LinkHandle> {
        self.links.get(edge)
    }

    /// True if `edge` is live but one of its interfaces is not up.
    pub fn is_degraded(&self, edge: &Edge) -> bool {
        self.links
            .get(edge)
            .is_some_and(|h| h.interfaces().iter().any(|i| self.down.contains(&i.name)))
    }

    /// Nodes with at least one active interface on a live link.
    pub fn active_nodes(&self) -> BTreeSet<NodeId> {
        self.links
            .values()
            .flat_map(|h| h.interfaces())
            .filter(|i| !self.down.contains(&i.name))
            .map(|i| i.node)
            .collect()
    }

    fn insert(&mut self, handle: LinkHandle) {
        self.links.insert(handle.edge, handle);
    }

    fn remove(&mut self, edge: &Edge) {
        if let Some(handle) = self.links.remove(edge) {
            for iface in handle.interfaces() {
                self.down.remove(&iface.name);
            }
        }
    }
}

/// Step of a link operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Deactivate,
    Delete,
    Add,
    Activate,
}

/// A control failure observed while applying a plan.
#[derive(Debug)]
pub struct OperationFailure {
    pub edge: Edge,
    pub stage: FailureStage,
    pub error: ControlError,
}

/// What a reconciliation pass planned and what actually took effect.
#[derive(Debug, Default)]
pub struct ReconciliationOutcome {
    /// The computed diff
    pub plan: ReconciliationResult,

    /// Edges that were created
    pub added: BTreeSet<Edge>,

    /// Edges that left the live topology
    pub removed: BTreeSet<Edge>,

    /// Failures, in the order they happened
    pub failures: Vec<OperationFailure>,
}

impl ReconciliationOutcome {
    /// True if every operation succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies reconciliation plans through a control interface.
pub struct Reconciler<'a, N: ?Sized> {
    control: &'a N,
}

impl<'a, N: NetworkControl + ?Sized> Reconciler<'a, N> {
    pub fn new(control: &'a N) -> Self {
        Self { control }
    }

    /// Brings `live` in line with `desired`.
    ///
    /// Removals run before additions. A failed delete keeps the edge live
    /// and a failed add leaves it out, so either is retried on the next
    /// pass. Interfaces that failed to come up are re-activated on later
    /// passes while their edge stays desired.
    pub async fn apply(&self, desired: &Snapshot, live: &mut LiveTopology) -> ReconciliationOutcome {
        let plan = reconcile(desired, &live.edges());
        let mut outcome = ReconciliationOutcome::default();

        for edge in &plan.removed {
            let Some(handle) = live.handle(edge).cloned() else {
                continue;
            };

            for iface in handle.interfaces() {
                match self.control.deactivate_interface(iface).await {
                    Ok(()) => {
                        live.down.insert(iface.name.clone());
                    }
                    Err(error) => {
                        warn!(%edge, iface = %iface, %error, "Failed to deactivate interface");
                        outcome.failures.push(OperationFailure {
                            edge: *edge,
                            stage: FailureStage::Deactivate,
                            error,
                        });
                    }
                }
            }

            if let Err(error) = self.control.delete_link(&handle).await {
                warn!(%edge, %error, "Failed to delete link, keeping it live");
                outcome.failures.push(OperationFailure {
                    edge: *edge,
                    stage: FailureStage::Delete,
                    error,
                });
                continue;
            }

            debug!("--- Deleted {edge}");
            live.remove(edge);
            outcome.removed.insert(*edge);
        }

        for edge in &plan.added {
            let (a, b) = edge.endpoints();
            let handle = match self.control.add_link(a, b).await {
                Ok(handle) => handle,
                Err(error) => {
                    warn!(%edge, %error, "Failed to add link");
                    outcome.failures.push(OperationFailure {
                        edge: *edge,
                        stage: FailureStage::Add,
                        error,
                    });
                    continue;
                }
            };

            debug!("+++ Added {edge}");
            self.activate(&handle, live, &mut outcome).await;
            live.insert(handle);
            outcome.added.insert(*edge);
        }

        let degraded: Vec<LinkHandle> = desired
            .iter()
            .filter(|e| !plan.added.contains(*e) && live.is_degraded(e))
            .filter_map(|e| live.handle(e).cloned())
            .collect();
        for handle in degraded {
            debug!(edge = %handle.edge, "Re-activating interfaces");
            self.activate(&handle, live, &mut outcome).await;
        }

        outcome.plan = plan;
        outcome
    }

    /// Brings every interface of `handle` up, tracking the ones that fail.
    async fn activate(&self, handle: &LinkHandle, live: &mut LiveTopology, outcome: &mut ReconciliationOutcome) {
        for iface in handle.interfaces() {
            match self.control.activate_interface(iface).await {
                Ok(()) => {
                    live.down.remove(&iface.name);
                }
                Err(error) => {
                    warn!(edge = %handle.edge, iface = %iface, %error, "Failed to activate interface");
                    live.down.insert(iface.name.clone());
                    outcome.failures.push(OperationFailure {
                        edge: handle.edge,
                        stage: FailureStage::Activate,
                        error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use islnet_env::{ControlOp, MemoryNetwork};
    use proptest::prelude::*;

    fn edge(a: u32, b: u32) -> Edge {
        Edge::new(a, b).unwrap()
    }

    fn edges(pairs: &[(u32, u32)]) -> BTreeSet<Edge> {
        pairs.iter().map(|&(a, b)| edge(a, b)).collect()
    }

    #[test]
    fn test_reconcile_from_empty() {
        let result = reconcile(&edges(&[(0, 1), (1, 2)]), &BTreeSet::new());
        assert_eq!(result.added, edges(&[(0, 1), (1, 2)]));
        assert!(result.removed.is_empty());
    }

    #[test]
    fn test_reconcile_replacement() {
        let live = edges(&[(0, 1), (1, 2)]);
        let desired = edges(&[(1, 2), (2, 3)]);
        let result = reconcile(&desired, &live);

        assert_eq!(result.added, edges(&[(2, 3)]));
        assert_eq!(result.removed, edges(&[(0, 1)]));
    }

    #[test]
    fn test_reconcile_ignores_orientation() {
        let live = edges(&[(1, 0), (2, 1)]);
        let desired = edges(&[(0, 1), (1, 2)]);
        assert!(reconcile(&desired, &live).is_empty());
    }

    #[tokio::test]
    async fn test_apply_removes_before_adding() {
        let net = MemoryNetwork::new(4);
        net.seed_link(edge(0, 1));
        net.seed_link(edge(1, 2));

        let mut live = LiveTopology::from_links(net.list_links().await.unwrap());
        net.clear_ops();

        let desired = edges(&[(1, 2), (2, 3)]);
        let outcome = Reconciler::new(&net).apply(&desired, &mut live).await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.added, edges(&[(2, 3)]));
        assert_eq!(outcome.removed, edges(&[(0, 1)]));
        assert_eq!(live.edges(), desired);
        assert_eq!(net.edges().into_iter().collect::<BTreeSet<_>>(), desired);

        let ops = net.ops();
        assert_eq!(
            ops,
            vec![
                ControlOp::Deactivate("s0-eth1".to_string()),
                ControlOp::Deactivate("s1-eth0".to_string()),
                ControlOp::DeleteLink(edge(0, 1)),
                ControlOp::AddLink(edge(2, 3)),
                ControlOp::Activate("s2-eth3".to_string()),
                ControlOp::Activate("s3-eth2".to_string()),
            ]
        );
        assert!(net.is_up("s2-eth3") && net.is_up("s3-eth2"));
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let net = MemoryNetwork::new(5);
        let mut live = LiveTopology::new();
        let desired = edges(&[(0, 1), (3, 4), (1, 4)]);

        let first = Reconciler::new(&net).apply(&desired, &mut live).await;
        assert_eq!(first.added.len(), 3);

        net.clear_ops();
        let second = Reconciler::new(&net).apply(&desired, &mut live).await;
        assert!(second.plan.is_empty());
        assert!(second.added.is_empty() && second.removed.is_empty());
        assert!(net.ops().is_empty());
    }

    #[tokio::test]
    async fn test_failed_add_is_retried_next_pass() {
        let net = MemoryNetwork::new(3);
        let mut live = LiveTopology::new();
        let desired = edges(&[(0, 1), (1, 2)]);

        net.fail_edge(edge(1, 2));
        let outcome = Reconciler::new(&net).apply(&desired, &mut live).await;
        assert!(!outcome.is_complete());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, FailureStage::Add);
        assert_eq!(live.edges(), edges(&[(0, 1)]));

        net.heal_all();
        let outcome = Reconciler::new(&net).apply(&desired, &mut live).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.added, edges(&[(1, 2)]));
        assert_eq!(live.edges(), desired);
    }

    #[tokio::test]
    async fn test_delete_of_vanished_link_succeeds() {
        let net = MemoryNetwork::new(3);
        let mut live = LiveTopology::new();
        Reconciler::new(&net).apply(&edges(&[(0, 1)]), &mut live).await;

        // The substrate lost the link behind our back
        let handle = live.handle(&edge(0, 1)).cloned().unwrap();
        net.delete_link(&handle).await.unwrap();

        let outcome = Reconciler::new(&net).apply(&BTreeSet::new(), &mut live).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.removed, edges(&[(0, 1)]));
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_edge_and_retries() {
        let net = MemoryNetwork::new(2);
        net.seed_link(edge(0, 1));
        let mut live = LiveTopology::from_links(net.list_links().await.unwrap());

        net.fail_edge(edge(0, 1));
        let outcome = Reconciler::new(&net).apply(&BTreeSet::new(), &mut live).await;

        assert!(!outcome.is_complete());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, FailureStage::Delete);
        assert!(outcome.removed.is_empty());
        assert!(live.contains(&edge(0, 1)));
        assert_eq!(net.edges(), vec![edge(0, 1)]);

        // Interfaces went down, so the endpoints are no longer probed
        assert!(live.active_nodes().is_empty());

        net.heal_all();
        let outcome = Reconciler::new(&net).apply(&BTreeSet::new(), &mut live).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.removed, edges(&[(0, 1)]));
        assert!(live.is_empty());
        assert!(net.edges().is_empty());

        // The edge can come back cleanly afterwards
        let outcome = Reconciler::new(&net).apply(&edges(&[(0, 1)]), &mut live).await;
        assert!(outcome.is_complete());
        assert_eq!(live.edges(), edges(&[(0, 1)]));
    }

    #[tokio::test]
    async fn test_failed_removal_reports_every_stage() {
        let net = MemoryNetwork::new(2);
        let mut live = LiveTopology::new();
        Reconciler::new(&net).apply(&edges(&[(0, 1)]), &mut live).await;

        net.set_fail_all(true);
        let outcome = Reconciler::new(&net).apply(&BTreeSet::new(), &mut live).await;

        let stages: Vec<FailureStage> = outcome.failures.iter().map(|f| f.stage).collect();
        assert_eq!(
            stages,
            vec![FailureStage::Deactivate, FailureStage::Deactivate, FailureStage::Delete]
        );
        assert!(outcome.removed.is_empty());
        assert!(live.contains(&edge(0, 1)));
    }

    #[tokio::test]
    async fn test_failed_activation_is_repaired() {
        let net = MemoryNetwork::new(3);
        let mut live = LiveTopology::new();
        let desired = edges(&[(0, 1), (1, 2)]);

        net.fail_interface("s2-eth1");
        let outcome = Reconciler::new(&net).apply(&desired, &mut live).await;
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, FailureStage::Activate);
        assert_eq!(live.edges(), desired);
        assert!(live.is_degraded(&edge(1, 2)));

        // Node 2 has no interface up, so it is not active
        let nodes: Vec<u32> = live.active_nodes().into_iter().map(|n| n.0).collect();
        assert_eq!(nodes, vec![0, 1]);

        net.heal_all();
        net.clear_ops();
        let outcome = Reconciler::new(&net).apply(&desired, &mut live).await;
        assert!(outcome.is_complete());
        assert!(outcome.plan.is_empty());
        assert!(!live.is_degraded(&edge(1, 2)));
        assert_eq!(live.active_nodes().len(), 3);
        assert_eq!(
            net.ops(),
            vec![
                ControlOp::Activate("s1-eth2".to_string()),
                ControlOp::Activate("s2-eth1".to_string()),
            ]
        );
        assert!(net.is_up("s2-eth1"));
    }

    #[tokio::test]
    async fn test_add_conflict_leaves_edge_out() {
        let net = MemoryNetwork::new(3);
        let mut live = LiveTopology::new();

        // Pre-existing link in the substrate makes the add fail, nothing else
        net.seed_link(edge(1, 2));
        let outcome = Reconciler::new(&net).apply(&edges(&[(0, 1), (1, 2)]), &mut live).await;

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].edge, edge(1, 2));
        assert_eq!(outcome.added, edges(&[(0, 1)]));
        assert!(live.contains(&edge(0, 1)));
        assert!(!live.contains(&edge(1, 2)));
    }

    #[test]
    fn test_active_nodes() {
        let mut live = LiveTopology::new();
        assert!(live.active_nodes().is_empty());

        let net = MemoryNetwork::new(6);
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(Reconciler::new(&net).apply(&edges(&[(0, 1), (4, 5)]), &mut live));

        let nodes: Vec<u32> = live.active_nodes().into_iter().map(|n| n.0).collect();
        assert_eq!(nodes, vec![0, 1, 4, 5]);
    }

    fn edge_set() -> impl Strategy<Value = BTreeSet<Edge>> {
        proptest::collection::vec((0u32..8, 0u32..8), 0..20)
            .prop_map(|pairs| pairs.into_iter().filter_map(|(a, b)| Edge::new(a, b)).collect())
    }

    proptest! {
        #[test]
        fn prop_reconcile_is_set_difference(live in edge_set(), desired in edge_set()) {
            let result = reconcile(&desired, &live);

            prop_assert_eq!(&result.added, &desired.difference(&live).copied().collect::<BTreeSet<_>>());
            prop_assert_eq!(&result.removed, &live.difference(&desired).copied().collect::<BTreeSet<_>>());
            prop_assert!(result.added.is_disjoint(&result.removed));

            // Applying the diff yields exactly the desired set
            let mut applied: BTreeSet<Edge> = live.difference(&result.removed).copied().collect();
            applied.extend(result.added.iter().copied());
            prop_assert_eq!(applied, desired.clone());

            prop_assert!(reconcile(&desired, &desired).is_empty());
        }

        #[test]
        fn prop_apply_converges(live in edge_set(), desired in edge_set()) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let net = MemoryNetwork::new(8);
            for e in &live {
                net.seed_link(*e);
            }

            rt.block_on(async {
                let mut topology = LiveTopology::from_links(net.list_links().await.unwrap());
                let outcome = Reconciler::new(&net).apply(&desired, &mut topology).await;

                prop_assert!(outcome.is_complete());
                prop_assert_eq!(topology.edges(), desired.clone());
                prop_assert_eq!(net.edges().into_iter().collect::<BTreeSet<_>>(), desired.clone());

                let again = Reconciler::new(&net).apply(&desired, &mut topology).await;
                prop_assert!(again.plan.is_empty());
                Ok(())
            })?;
        }
    }
}
