// tests/dag_property.rs

use std::collections::{BTreeSet, HashMap, HashSet};

use proptest::prelude::*;
use stepdag::dag::Dag;
use stepdag_test_utils::builders::dag_from_edges;

/// Edge lists for random acyclic graphs: node `i` may only depend on nodes
/// `0..i`, so every generated graph is valid.
fn acyclic_edges(max_nodes: usize) -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    (1..=max_nodes).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        let deps: BTreeSet<usize> = if i == 0 {
                            BTreeSet::new()
                        } else {
                            picks.into_iter().map(|p| p % i).collect()
                        };
                        (
                            format!("n{i}"),
                            deps.into_iter().map(|d| format!("n{d}")).collect(),
                        )
                    })
                    .collect()
            },
        )
    })
}

fn build(edges: &[(String, Vec<String>)]) -> Dag<()> {
    let deps: Vec<Vec<&str>> = edges
        .iter()
        .map(|(_, d)| d.iter().map(String::as_str).collect())
        .collect();
    let pairs: Vec<(&str, &[&str])> = edges
        .iter()
        .zip(&deps)
        .map(|((id, _), d)| (id.as_str(), d.as_slice()))
        .collect();
    dag_from_edges(&pairs)
}

proptest! {
    #[test]
    fn generated_graphs_validate(edges in acyclic_edges(12)) {
        let dag = build(&edges);
        prop_assert!(dag.validate().is_ok());
    }

    #[test]
    fn topological_order_respects_every_edge(edges in acyclic_edges(12)) {
        let dag = build(&edges);
        let order = dag.topological_sort().map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(order.len(), edges.len());
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        for (id, deps) in &edges {
            for dep in deps {
                prop_assert!(
                    position[dep.as_str()] < position[id.as_str()],
                    "{} must come before {}", dep, id
                );
            }
        }
    }

    #[test]
    fn readiness_waves_cover_every_node_once(edges in acyclic_edges(12)) {
        let dag = build(&edges);
        let mut completed: HashSet<String> = HashSet::new();
        let mut waves = 0;

        while completed.len() < dag.len() {
            let ready: Vec<String> =
                dag.get_ready_nodes(&completed).into_iter().map(|n| n.id.clone()).collect();
            prop_assert!(!ready.is_empty(), "no ready node with {:?} done", completed);
            for id in ready {
                prop_assert!(completed.insert(id));
            }
            waves += 1;
            prop_assert!(waves <= edges.len());
        }
    }
}
