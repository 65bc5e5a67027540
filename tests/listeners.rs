use std::sync::{Arc, Mutex};
use std::thread;

use datatree::prelude::*;

type Events = Arc<Mutex<Vec<DataChangeEvent>>>;

fn schema() -> SchemaContext {
    SchemaContext::builder()
        .container("network", |network| {
            network
                .leaf("domain", LeafType::String)
                .list("interfaces", ["name"], |interface| {
                    interface
                        .leaf("name", LeafType::String)
                        .leaf("mtu", LeafType::Uint)
                        .leaf_list("addresses", LeafType::String)
                })
        })
        .build()
        .expect("schema")
}

fn network() -> InstanceIdentifier {
    InstanceIdentifier::root().node("network")
}

fn interfaces() -> InstanceIdentifier {
    network().node("interfaces")
}

fn interface(name: &str) -> InstanceIdentifier {
    interfaces().child(PathArgument::entry("interfaces", [("name", name)]))
}

fn interface_data(name: &str, mtu: u64) -> NormalizedNode {
    ContainerNode::map_entry("interfaces", [("name", name)])
        .with_child(LeafNode::new("mtu", mtu))
        .into()
}

fn recorder() -> (Events, impl Fn(&DataChangeEvent) + Send + Sync + 'static) {
    let events: Events = Arc::default();
    let sink = events.clone();
    (events, move |event: &DataChangeEvent| {
        sink.lock().unwrap().push(event.clone())
    })
}

fn write(tree: &DataTree, path: &InstanceIdentifier, data: NormalizedNode) {
    let mut modification = tree.take_snapshot().new_modification();
    modification.write(path, data).expect("write");
    tree.submit(modification).expect("submit");
}

#[test]
fn base_listener_ignores_child_changes() {
    let tree = DataTree::new(schema());
    write(&tree, &interface("eth0"), interface_data("eth0", 1500));

    let (base, listener) = recorder();
    let _base = tree.register_data_change_listener(&interface("eth0"), listener, DataChangeScope::Base);
    let (subtree, listener) = recorder();
    let _subtree =
        tree.register_data_change_listener(&interface("eth0"), listener, DataChangeScope::Subtree);

    let mtu = interface("eth0").node("mtu");
    write(&tree, &mtu, LeafNode::new("mtu", 9000u64).into());

    assert!(base.lock().unwrap().is_empty());
    let subtree = subtree.lock().unwrap();
    assert_eq!(subtree.len(), 1);
    let event = &subtree[0];
    assert_eq!(event.scope(), DataChangeScope::Subtree);
    assert_eq!(
        event.updated_data().get(&mtu),
        Some(&LeafNode::new("mtu", 9000u64).into())
    );
    assert_eq!(
        event.original_data().get(&mtu),
        Some(&LeafNode::new("mtu", 1500u64).into())
    );
    assert_eq!(event.updated_subtree(), tree.take_snapshot().read(&interface("eth0")).as_ref());
}

#[test]
fn base_listener_sees_its_node_replaced() {
    let tree = DataTree::new(schema());
    write(&tree, &interface("eth0"), interface_data("eth0", 1500));

    let (base, listener) = recorder();
    let _registration =
        tree.register_data_change_listener(&interface("eth0"), listener, DataChangeScope::Base);
    write(&tree, &interface("eth0"), interface_data("eth0", 9000));

    let base = base.lock().unwrap();
    assert_eq!(base.len(), 1);
    assert!(base[0].updated_data().contains_key(&interface("eth0")));
    assert!(base[0].updated_data().contains_key(&interface("eth0").node("mtu")));
}

#[test]
fn one_scope_reports_direct_children_only() {
    let tree = DataTree::new(schema());
    write(&tree, &interface("eth0"), interface_data("eth0", 1500));

    let (one, listener) = recorder();
    let _registration = tree.register_data_change_listener(&network(), listener, DataChangeScope::One);

    write(&tree, &interface("eth0").node("mtu"), LeafNode::new("mtu", 9000u64).into());
    assert!(one.lock().unwrap().is_empty());

    write(&tree, &network().node("domain"), LeafNode::new("domain", "example.org").into());
    let one = one.lock().unwrap();
    assert_eq!(one.len(), 1);
    assert!(one[0].created_data().contains_key(&network().node("domain")));
}

#[test]
fn wildcard_registration_covers_all_entries() {
    let tree = DataTree::new(schema());
    let (events, listener) = recorder();
    let _registration = tree.register_data_change_listener(
        &interfaces().node("interfaces").node("mtu"),
        listener,
        DataChangeScope::Base,
    );

    write(&tree, &interface("eth0"), interface_data("eth0", 1500));
    write(&tree, &interface("eth1"), interface_data("eth1", 1500));
    write(&tree, &interface("eth1").node("mtu"), LeafNode::new("mtu", 9000u64).into());

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert!(events[0].created_data().contains_key(&interface("eth0").node("mtu")));
    assert!(events[1].created_data().contains_key(&interface("eth1").node("mtu")));
    assert!(events[2].updated_data().contains_key(&interface("eth1").node("mtu")));
}

#[test]
fn removals_report_every_removed_path() {
    let tree = DataTree::new(schema());
    write(&tree, &interface("eth0"), interface_data("eth0", 1500));

    let (events, listener) = recorder();
    let _registration =
        tree.register_data_change_listener(&interfaces(), listener, DataChangeScope::Subtree);

    let mut modification = tree.take_snapshot().new_modification();
    modification.delete(&interface("eth0")).expect("delete");
    tree.submit(modification).expect("submit");

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    let removed = events[0].removed_paths();
    assert!(removed.contains(&interface("eth0")));
    assert!(removed.contains(&interface("eth0").node("mtu")));
    assert!(removed.contains(&interface("eth0").node("name")));
    assert_eq!(
        events[0].original_data().get(&interface("eth0")),
        Some(&interface_data("eth0", 1500))
    );
}

#[test]
fn closed_registrations_prune_the_listener_tree() {
    let tree = DataTree::new(schema());
    assert_eq!(tree.listener_tree().node_count(), 1);

    let (events, listener) = recorder();
    let mut registration =
        tree.register_data_change_listener(&interface("eth0").node("mtu"), listener, DataChangeScope::Base);
    assert!(tree.listener_tree().contains_node(&interface("eth0").node("mtu")));
    assert_eq!(tree.listener_tree().node_count(), 5);

    registration.close();
    assert!(registration.is_closed());
    assert_eq!(tree.listener_tree().node_count(), 1);
    assert!(!tree.listener_tree().contains_node(&network()));

    write(&tree, &interface("eth0"), interface_data("eth0", 1500));
    assert!(events.lock().unwrap().is_empty());

    let (_, listener) = recorder();
    drop(tree.register_data_change_listener(&network(), listener, DataChangeScope::Base));
    assert_eq!(tree.listener_tree().node_count(), 1);
}

#[test]
fn queued_listeners_see_commits_in_order() {
    let tree = DataTree::with_config(
        schema(),
        DataTreeConfig::default()
            .with_name("queued")
            .with_dispatch(DispatchMode::Queued),
    );
    let (events, listener) = recorder();
    let _registration =
        tree.register_data_change_listener(&interface("eth0").node("mtu"), listener, DataChangeScope::Base);

    for mtu in 1000..1020u64 {
        write(&tree, &interface("eth0").node("mtu"), LeafNode::new("mtu", mtu).into());
    }
    tree.flush_notifications();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 20);
    let mtu = interface("eth0").node("mtu");
    for (event, expected) in events.iter().zip(1000..1020u64) {
        let data = event
            .updated_data()
            .get(&mtu)
            .or_else(|| event.created_data().get(&mtu))
            .expect("mtu changed");
        assert_eq!(data.value(), Some(&Value::Uint(expected)));
    }
}

fn fail(_: &DataChangeEvent) {
    panic!("listener failure");
}

#[test]
fn panicking_listener_does_not_stop_delivery() {
    let tree = DataTree::new(schema());
    let _panicking = tree.register_data_change_listener(
        &network(),
        fail,
        DataChangeScope::Subtree,
    );
    let (events, listener) = recorder();
    let _registration = tree.register_data_change_listener(&network(), listener, DataChangeScope::Subtree);

    write(&tree, &network().node("domain"), LeafNode::new("domain", "example.org").into());
    assert_eq!(events.lock().unwrap().len(), 1);
    assert!(tree.take_snapshot().exists(&network().node("domain")));
}

#[test]
fn registration_races_with_commits() {
    let tree = Arc::new(DataTree::new(schema()));
    let writer = {
        let tree = tree.clone();
        thread::spawn(move || {
            for mtu in 0..200u64 {
                write(&tree, &interface("eth0").node("mtu"), LeafNode::new("mtu", mtu).into());
            }
        })
    };

    for _ in 0..200 {
        let (_, listener) = recorder();
        let registration =
            tree.register_data_change_listener(&interface("eth0"), listener, DataChangeScope::Subtree);
        drop(registration);
    }
    writer.join().expect("writer");

    assert_eq!(tree.listener_tree().node_count(), 1);
    assert_eq!(
        tree.take_snapshot()
            .read(&interface("eth0").node("mtu"))
            .as_ref()
            .and_then(NormalizedNode::value),
        Some(&Value::Uint(199))
    );
}

#[test]
fn inline_listener_cannot_commit_to_its_own_tree() {
    let tree = Arc::new(DataTree::new(schema()));
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let listener = {
        let tree = Arc::downgrade(&tree);
        let outcomes = outcomes.clone();
        move |_: &DataChangeEvent| {
            let Some(tree) = tree.upgrade() else {
                return;
            };
            let mut modification = tree.take_snapshot().new_modification();
            modification
                .write(&network().node("domain"), LeafNode::new("domain", "nested").into())
                .expect("write");
            outcomes.lock().unwrap().push(tree.submit(modification));
        }
    };
    let _registration = tree.register_data_change_listener(&interface("eth0"), listener, DataChangeScope::Subtree);

    write(&tree, &interface("eth0"), interface_data("eth0", 1500));

    {
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Err(DataTreeError::IllegalState(_))));
    }
    assert!(!tree.take_snapshot().exists(&network().node("domain")));

    write(&tree, &network().node("domain"), LeafNode::new("domain", "outside").into());
    assert!(tree.take_snapshot().exists(&network().node("domain")));
}
