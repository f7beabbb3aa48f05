//! Diff of a layer's live records against its target count.

use crate::model::Node;

/// Actions needed to bring one layer to its target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum LayerPlan {
    /// Nothing to do.
    Keep,
    /// Provision this many new nodes.
    Create(usize),
    /// Destroy these nodes, newest first.
    Destroy(Vec<Node>),
}

/// Plans a layer given its live records and the requested count.
///
/// Scale-down selects the highest sequence numbers first.
pub(crate) fn plan_layer(live: &[Node], target: u32) -> LayerPlan {
    let wanted = usize::try_from(target).unwrap_or(usize::MAX);
    let current = live.len();
    if wanted > current {
        return LayerPlan::Create(wanted - current);
    }
    if wanted == current {
        return LayerPlan::Keep;
    }
    let mut newest_first = live.to_vec();
    newest_first.sort_by(|a, b| b.sequence.cmp(&a.sequence));
    newest_first.truncate(current - wanted);
    LayerPlan::Destroy(newest_first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FormationId, LayerId, NodeId, NodeState};
    use rstest::rstest;

    fn node(sequence: u64) -> Node {
        Node {
            id: NodeId::from(format!("n{sequence}")),
            formation: FormationId::from("f"),
            layer: LayerId::from("runtime"),
            external_id: Some(format!("mock-{sequence}")),
            state: NodeState::Up,
            containers: 1,
            sequence,
        }
    }

    #[rstest]
    #[case(0, 3, LayerPlan::Create(3))]
    #[case(2, 2, LayerPlan::Keep)]
    #[case(0, 0, LayerPlan::Keep)]
    fn growth_and_steady_state(#[case] current: u64, #[case] target: u32, #[case] want: LayerPlan) {
        let live: Vec<_> = (1..=current).map(node).collect();
        assert_eq!(plan_layer(&live, target), want);
    }

    #[rstest]
    fn shrink_selects_newest_first() {
        let live = vec![node(4), node(1), node(7), node(2)];
        let LayerPlan::Destroy(selected) = plan_layer(&live, 1) else {
            panic!("expected destroy plan");
        };
        let sequences: Vec<_> = selected.iter().map(|n| n.sequence).collect();
        assert_eq!(sequences, [7, 4, 2]);
    }
}
