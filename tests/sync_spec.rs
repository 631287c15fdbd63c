use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use speculate2::speculate;
use tasksync::config::TaskConfig;
use tasksync::due_date::{DueDateCalculator, QuickDate};
use tasksync::engine::TaskEngine;
use tasksync::models::*;
use tasksync::tasks::TaskRegistry;
use tasksync::tree::{DocumentTree, MapTree, NodeSnapshot, TreeSnapshot};

fn dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").expect("valid test date")
}

/// Collects every notification the registry publishes.
fn record(registry: &TaskRegistry) -> Arc<Mutex<Vec<TaskChanged>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry.subscribe(Arc::new(move |change: &TaskChanged| {
        sink.lock().unwrap().push(change.clone())
    }));
    seen
}

/// Pending and completed are disjoint and together hold exactly the nodes
/// carrying a parsable due date, each in the partition its completion
/// marker calls for.
fn assert_consistent(map: &MapTree, registry: &TaskRegistry) {
    let calculator = DueDateCalculator::default();
    let pending = registry.pending();
    let completed = registry.completed();
    for task in &pending {
        assert!(
            completed.iter().all(|c| c.node != task.node),
            "node {} is both pending and completed",
            task.node
        );
    }

    let expected: HashSet<(NodeRef, NaiveDateTime)> = map
        .nodes_with_attribute(DUE_DATE_ATTRIBUTE)
        .into_iter()
        .filter_map(|(node, value)| {
            calculator
                .parse(&value)
                .ok()
                .map(|due| (NodeRef::new(map.id(), node), due))
        })
        .collect();
    let actual: HashSet<(NodeRef, NaiveDateTime)> =
        registry.all().iter().map(|t| (t.node, t.due_date)).collect();
    assert_eq!(actual, expected);
    assert_eq!(registry.len(), expected.len());

    let marker = map
        .attribute_spec(COMPLETION_DATE_ATTRIBUTE)
        .expect("completion spec registered");
    for task in registry.all() {
        assert_eq!(
            task.completed,
            map.get_attribute(task.node.node, &marker).is_some()
        );
    }
}

speculate! {
    before {
        let map = Arc::new(MapTree::new("Plan"));
        let engine = TaskEngine::new(TaskConfig::default());
        engine.on_tree_created(map.clone());
        let registry = engine.registry();
        let attrs = TaskAttributes::default();
        let due = map.attribute_spec(DUE_DATE_ATTRIBUTE).expect("due date spec registered");
        let node = map.add_node(map.root(), "Write report").expect("Failed to add node");
        let node_ref = NodeRef::new(map.id(), node);
    }

    describe "registration" {
        it "registers both task attributes as system date-time specs" {
            assert_eq!(due.data_type, AttributeDataType::DateTime);
            assert!(due.system_owned);
            assert_eq!(due.list_option, ListOption::NoList);
            let done = map.attribute_spec(COMPLETION_DATE_ATTRIBUTE).expect("completion spec");
            assert_eq!(done.data_type, AttributeDataType::DateTime);
        }

        it "reuses the existing spec when asked to create it again" {
            let again = map.create_attribute_spec(AttributeSpec::system_date_time(DUE_DATE_ATTRIBUTE));
            assert_eq!(again, due);
            assert_eq!(map.snapshot().attribute_specs.len(), 2);
        }

        it "ignores a second registration of the same tree" {
            assert!(!engine.on_tree_created(map.clone()));
            assert_eq!(map.listener_count(), 1);
        }

        it "ingests due dates already present on a loaded map" {
            let mut root = NodeSnapshot::new("Household");
            let mut milk = NodeSnapshot::new("Buy milk");
            milk.attributes.insert(DUE_DATE_ATTRIBUTE.to_string(), "2024-05-01 07:00:00".to_string());
            let mut rent = NodeSnapshot::new("Pay rent");
            rent.attributes.insert(DUE_DATE_ATTRIBUTE.to_string(), "2024-05-03".to_string());
            rent.attributes.insert(COMPLETION_DATE_ATTRIBUTE.to_string(), "2024-05-02 10:00:00".to_string());
            let mut broken = NodeSnapshot::new("Broken");
            broken.attributes.insert(DUE_DATE_ATTRIBUTE.to_string(), "tbd".to_string());
            root.children = vec![milk, rent, broken];

            let loaded = Arc::new(MapTree::from_snapshot(TreeSnapshot {
                name: "Household".to_string(),
                attribute_specs: Vec::new(),
                root,
            }));
            assert!(engine.on_tree_created(loaded.clone()));

            let pending = registry.pending();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].due_date, dt("2024-05-01 07:00"));
            assert_eq!(loaded.node_text(pending[0].node.node), Some("Buy milk".to_string()));

            let completed = registry.completed();
            assert_eq!(completed.len(), 1);
            assert_eq!(completed[0].due_date, dt("2024-05-03 07:00"));
            assert!(completed[0].completed);

            let stats = engine.sync_stats(loaded.id()).expect("tree is tracked");
            assert_eq!(stats.created, 2);
            assert_eq!(stats.invalid_values, 1);
        }
    }

    describe "due date added" {
        it "creates a pending task" {
            let seen = record(&registry);
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");

            assert_eq!(registry.pending(), vec![Task::new(node_ref, dt("2024-05-01 07:00"), false)]);
            assert!(registry.completed().is_empty());
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].kind, TaskChangeKind::Created);
        }

        it "creates a completed task when the node is already marked done" {
            Task::complete(map.as_ref(), node, &attrs, dt("2024-04-30 18:00")).expect("complete");
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");

            assert!(registry.pending().is_empty());
            assert_eq!(registry.completed(), vec![Task::new(node_ref, dt("2024-05-01 07:00"), true)]);
        }

        it "skips nodes whose value does not parse" {
            let seen = record(&registry);
            map.set_attribute(node, &due, "whenever".to_string()).expect("set");

            assert!(registry.is_empty());
            assert!(seen.lock().unwrap().is_empty());
            let stats = engine.sync_stats(map.id()).expect("tracked");
            assert_eq!(stats.invalid_values, 1);
            assert_eq!(stats.escalations, 0);
        }

        it "escalates repeated invalid values for the same node" {
            map.set_attribute(node, &due, "someday".to_string()).expect("set");
            map.set_attribute(node, &due, "later".to_string()).expect("set");

            let stats = engine.sync_stats(map.id()).expect("tracked");
            assert_eq!(stats.invalid_values, 2);
            assert_eq!(stats.escalations, 1);
            assert!(registry.is_empty());
        }
    }

    describe "due date removed" {
        it "restores the previous state after add then remove" {
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            let seen = record(&registry);
            assert!(Task::clear_due_date(map.as_ref(), node, &attrs).expect("clear"));

            assert!(registry.is_empty());
            assert_eq!(registry.find(node_ref, dt("2024-05-01 07:00")), None);
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].kind, TaskChangeKind::Removed);
        }

        it "removes the task of a completed node" {
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            Task::complete(map.as_ref(), node, &attrs, dt("2024-05-01 12:00")).expect("complete");
            Task::clear_due_date(map.as_ref(), node, &attrs).expect("clear");
            assert!(registry.is_empty());
        }

        it "drops a completed task with one notification when its node is deleted" {
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            Task::complete(map.as_ref(), node, &attrs, dt("2024-05-01 12:00")).expect("complete");
            let seen = record(&registry);

            map.delete_node(node).expect("delete");

            assert!(registry.is_empty());
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].kind, TaskChangeKind::Removed);
            assert_eq!(seen[0].task, Task::new(node_ref, dt("2024-05-01 07:00"), true));
            assert_eq!(engine.sync_stats(map.id()).expect("tracked").moved, 1);
        }

        it "removes tasks of a deleted subtree" {
            let child = map.add_node(node, "Draft outline").expect("add child");
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            map.set_attribute(child, &due, "2024-05-02 07:00:00".to_string()).expect("set");
            let keeper = map.add_node(map.root(), "Unrelated").expect("add");
            map.set_attribute(keeper, &due, "2024-05-03 07:00:00".to_string()).expect("set");
            assert_eq!(registry.len(), 3);

            map.delete_node(node).expect("delete");

            assert_eq!(registry.pending(), vec![Task::new(NodeRef::new(map.id(), keeper), dt("2024-05-03 07:00"), false)]);
        }
    }

    describe "due date updated" {
        it "re-keys the task to the new value with one notification" {
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            let seen = record(&registry);
            map.set_attribute(node, &due, "2024-05-09 16:30:00".to_string()).expect("update");

            assert_eq!(registry.find(node_ref, dt("2024-05-01 07:00")), None);
            assert_eq!(
                registry.find(node_ref, dt("2024-05-09 16:30")),
                Some(Task::new(node_ref, dt("2024-05-09 16:30"), false))
            );
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].kind, TaskChangeKind::Updated { previous_due_date: dt("2024-05-01 07:00") });
        }

        it "keeps a completed task in the completed partition" {
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            Task::complete(map.as_ref(), node, &attrs, dt("2024-05-01 12:00")).expect("complete");
            map.set_attribute(node, &due, "2024-06-01 07:00:00".to_string()).expect("update");

            assert!(registry.pending().is_empty());
            assert_eq!(registry.completed(), vec![Task::new(node_ref, dt("2024-06-01 07:00"), true)]);
        }

        it "drops the task when the new value does not parse" {
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            map.set_attribute(node, &due, "soon".to_string()).expect("update");
            assert!(registry.is_empty());
        }

        it "creates the task when an invalid value is corrected" {
            map.set_attribute(node, &due, "soon".to_string()).expect("set");
            map.set_attribute(node, &due, "2024-05-01".to_string()).expect("update");
            assert_eq!(registry.pending(), vec![Task::new(node_ref, dt("2024-05-01 07:00"), false)]);
        }

        it "keeps the chosen time of day for quick dates" {
            map.set_attribute(node, &due, "2024-04-20 16:15:00".to_string()).expect("set");
            let applied = Task::apply_quick_date(
                map.as_ref(),
                node,
                &attrs,
                &DueDateCalculator::default(),
                QuickDate::NextMonth,
                dt("2024-01-31 09:00"),
            )
            .expect("quick date");

            assert_eq!(applied, dt("2024-02-29 16:15"));
            assert_eq!(registry.pending(), vec![Task::new(node_ref, dt("2024-02-29 16:15"), false)]);
        }

        it "uses the default hour for a first quick date" {
            let applied = Task::apply_quick_date(
                map.as_ref(),
                node,
                &attrs,
                &DueDateCalculator::default(),
                QuickDate::Tomorrow,
                dt("2024-05-01 22:00"),
            )
            .expect("quick date");
            assert_eq!(applied, dt("2024-05-02 07:00"));
            assert_eq!(registry.len(), 1);
        }
    }

    describe "completion" {
        it "moves the task to completed with a single notification" {
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            let seen = record(&registry);
            Task::complete(map.as_ref(), node, &attrs, dt("2024-05-02 09:00")).expect("complete");

            assert!(registry.pending().is_empty());
            assert_eq!(registry.completed(), vec![Task::new(node_ref, dt("2024-05-01 07:00"), true)]);
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(
                seen[0].kind,
                TaskChangeKind::Moved { from: TaskState::Pending, to: TaskState::Completed }
            );
        }

        it "moves the task back when reopened" {
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            Task::complete(map.as_ref(), node, &attrs, dt("2024-05-02 09:00")).expect("complete");
            assert!(Task::reopen(map.as_ref(), node, &attrs).expect("reopen"));

            assert_eq!(registry.pending(), vec![Task::new(node_ref, dt("2024-05-01 07:00"), false)]);
            assert!(registry.completed().is_empty());
            assert_eq!(engine.sync_stats(map.id()).expect("tracked").moved, 2);
        }

        it "ignores completion on a node without a due date" {
            let seen = record(&registry);
            Task::complete(map.as_ref(), node, &attrs, dt("2024-05-02 09:00")).expect("complete");
            assert!(registry.is_empty());
            assert!(seen.lock().unwrap().is_empty());
        }

        it "ignores re-stamping the completion date" {
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            Task::complete(map.as_ref(), node, &attrs, dt("2024-05-02 09:00")).expect("complete");
            let seen = record(&registry);
            Task::complete(map.as_ref(), node, &attrs, dt("2024-05-03 09:00")).expect("complete");
            assert!(seen.lock().unwrap().is_empty());
            assert_eq!(registry.completed().len(), 1);
        }
    }

    describe "tree lifecycle" {
        it "purges and unsubscribes when a tree is deleted" {
            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            let other = map.add_node(map.root(), "Second").expect("add");
            map.set_attribute(other, &due, "2024-05-02 07:00:00".to_string()).expect("set");
            Task::complete(map.as_ref(), other, &attrs, dt("2024-05-01 08:00")).expect("complete");
            let seen = record(&registry);

            assert_eq!(engine.on_tree_deleted(map.id()), Some(2));

            assert!(registry.is_empty());
            assert_eq!(map.listener_count(), 0);
            assert!(!engine.is_tracking(map.id()));
            {
                let seen = seen.lock().unwrap();
                assert_eq!(seen.len(), 2);
                assert!(seen.iter().all(|c| c.kind == TaskChangeKind::Removed));
            }

            map.set_attribute(node, &due, "2024-06-01 07:00:00".to_string()).expect("update");
            assert!(registry.is_empty());
            assert_eq!(engine.on_tree_deleted(map.id()), None);
        }

        it "keeps trees independent" {
            let second = Arc::new(MapTree::new("Other"));
            engine.on_tree_created(second.clone());
            let second_due = second.attribute_spec(DUE_DATE_ATTRIBUTE).expect("spec");
            let elsewhere = second.add_node(second.root(), "Elsewhere").expect("add");

            map.set_attribute(node, &due, "2024-05-01 07:00:00".to_string()).expect("set");
            second.set_attribute(elsewhere, &second_due, "2024-05-01 07:00:00".to_string()).expect("set");
            assert_eq!(registry.len(), 2);

            engine.on_tree_deleted(second.id());
            assert_eq!(registry.pending(), vec![Task::new(node_ref, dt("2024-05-01 07:00"), false)]);
        }
    }

    describe "invariants" {
        it "hold across an interleaved sequence of edits" {
            let mut nodes = vec![node];
            nodes.push(map.add_node(map.root(), "Second").expect("add"));
            nodes.push(map.add_node(nodes[0], "Third").expect("add"));

            for i in 0..90usize {
                let target = nodes[i % nodes.len()];
                match (i * 7 + i / 3) % 6 {
                    0 => map
                        .set_attribute(target, &due, format!("2024-05-{:02} 07:00:00", i % 28 + 1))
                        .expect("set"),
                    1 => {
                        Task::clear_due_date(map.as_ref(), target, &attrs).expect("clear");
                    }
                    2 => Task::complete(map.as_ref(), target, &attrs, dt("2024-05-01 12:00"))
                        .expect("complete"),
                    3 => {
                        Task::reopen(map.as_ref(), target, &attrs).expect("reopen");
                    }
                    4 => map.set_attribute(target, &due, "not a date".to_string()).expect("set"),
                    _ => map
                        .set_attribute(target, &due, format!("2024-06-{:02}", i % 30 + 1))
                        .expect("set"),
                }
                assert_consistent(&map, &registry);
            }

            let stats = engine.sync_stats(map.id()).expect("tracked");
            assert_eq!(stats.duplicates, 0);
        }
    }
}
