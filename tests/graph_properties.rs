// tests/graph_properties.rs

use std::collections::BTreeSet;

use proptest::prelude::*;
use taskrig::config::Container;
use taskrig::dag::ContainerDependencyGraph;
use taskrig::engine::{EventHistory, RunStagePlanner, StagePlanner, TaskStepRule};
use taskrig::errors::GraphError;
use taskrig_test_utils::builders::{ContainerBuilder, TaskBuilder, catalogue};

/// Every container reachable from `main` through declared dependencies.
fn reachable_from(main: &str, containers: &[Container]) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut pending = vec![main.to_string()];

    while let Some(name) = pending.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(container) = containers.iter().find(|c| c.name == name) {
            pending.extend(container.dependencies.iter().cloned());
        }
    }

    seen
}

// Acyclic catalogues: container N may only depend on containers 0..N-1.
// The last container is the task's main container.
fn catalogue_strategy(max_containers: usize) -> impl Strategy<Value = Vec<Container>> {
    (1..=max_containers).prop_flat_map(|count| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..count), count)
            .prop_map(move |raw_deps| {
                raw_deps
                    .into_iter()
                    .enumerate()
                    .map(|(i, potential)| {
                        let deps: BTreeSet<usize> = if i == 0 {
                            BTreeSet::new()
                        } else {
                            potential.into_iter().map(|d| d % i).collect()
                        };

                        let name = format!("c{i}");
                        let mut builder = ContainerBuilder::image(&name, &format!("image-{}", i % 3));
                        for dep in deps {
                            builder = builder.depends_on(&format!("c{dep}"));
                        }
                        builder.build()
                    })
                    .collect()
            })
    })
}

proptest! {
    #[test]
    fn graph_order_respects_every_edge(containers in catalogue_strategy(10)) {
        let main = containers.last().unwrap().name.clone();
        let catalogue = catalogue(containers);
        let task = TaskBuilder::new("prop").run(&main).build();

        let graph = ContainerDependencyGraph::new(&task, &catalogue).unwrap();
        let order: Vec<&str> = graph.container_names().collect();

        prop_assert_eq!(order.len(), graph.len());
        prop_assert_eq!(graph.root().map(|r| r.name()), Some(main.as_str()));

        for node in graph.nodes_in_order() {
            let me = order.iter().position(|n| *n == node.name()).unwrap();
            for dep in &node.depends_on {
                let pos = order.iter().position(|n| n == dep);
                prop_assert!(pos.is_some(), "dependency {} missing from graph", dep);
                prop_assert!(pos.unwrap() < me);
                prop_assert!(graph.dependents_of(dep).unwrap().contains(node.name()));
            }
        }
    }

    #[test]
    fn run_plan_pulls_each_image_once(containers in catalogue_strategy(10)) {
        let main = containers.last().unwrap().name.clone();
        let catalogue = catalogue(containers);
        let task = TaskBuilder::new("prop").run(&main).build();

        let graph = ContainerDependencyGraph::new(&task, &catalogue).unwrap();
        let rules = RunStagePlanner.plan(&graph, &EventHistory::new());

        let pulls: Vec<&String> = rules
            .iter()
            .filter_map(|r| match r {
                TaskStepRule::PullImage { image_name, .. } => Some(image_name),
                _ => None,
            })
            .collect();
        let unique: BTreeSet<&String> = pulls.iter().copied().collect();
        prop_assert_eq!(pulls.len(), unique.len());

        let creates = rules
            .iter()
            .filter(|r| matches!(r, TaskStepRule::CreateContainer { .. }))
            .count();
        prop_assert_eq!(creates, graph.len());
    }

    #[test]
    fn graph_holds_exactly_the_main_container_and_its_dependencies(
        containers in catalogue_strategy(10)
    ) {
        let main = containers.last().unwrap().name.clone();
        let expected = reachable_from(&main, &containers);
        let catalogue = catalogue(containers);
        let task = TaskBuilder::new("prop").run(&main).build();

        let graph = ContainerDependencyGraph::new(&task, &catalogue).unwrap();
        let actual: BTreeSet<String> = graph.container_names().map(str::to_string).collect();

        prop_assert_eq!(graph.len(), actual.len());
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn back_edge_to_the_main_container_is_a_cycle(
        mut containers in catalogue_strategy(10).prop_filter("two or more containers", |c| c.len() >= 2)
    ) {
        // main -> c0 -> main
        let main = containers.last().unwrap().name.clone();
        containers[0].dependencies.push(main.clone());
        let last = containers.len() - 1;
        if !containers[last].dependencies.iter().any(|d| d == "c0") {
            containers[last].dependencies.push("c0".to_string());
        }

        let catalogue = catalogue(containers);
        let task = TaskBuilder::new("prop").run(&main).build();

        match ContainerDependencyGraph::new(&task, &catalogue) {
            Err(GraphError::Cycle { task, containers }) => {
                prop_assert_eq!(task, "prop");
                prop_assert!(containers.contains(&main), "cycle {:?} misses {}", containers, main);
                prop_assert!(containers.contains(&"c0".to_string()));
            }
            other => prop_assert!(false, "expected a cycle error, got {:?}", other),
        }
    }
}
