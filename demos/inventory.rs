use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use datatree::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn schema() -> Result<SchemaContext> {
    let schema = SchemaContext::builder()
        .container("warehouse", |warehouse| {
            warehouse
                .mandatory_leaf("name", LeafType::String)
                .list("items", ["sku"], |item| {
                    item.leaf("sku", LeafType::String)
                        .mandatory_leaf("quantity", LeafType::Uint)
                        .leaf_list("tags", LeafType::String)
                })
        })
        .build()?;
    Ok(schema)
}

fn items() -> InstanceIdentifier {
    InstanceIdentifier::root().node("warehouse").node("items")
}

fn item(sku: &str) -> PathArgument {
    PathArgument::entry("items", [("sku", sku)])
}

fn stock(sku: &str, quantity: u64) -> NormalizedNode {
    ContainerNode::entry_for(item(sku))
        .with_child(LeafNode::new("quantity", quantity))
        .into()
}

fn quantity(snapshot: &DataTreeSnapshot, sku: &str) -> Option<u64> {
    match snapshot.read(&items().child(item(sku)).node("quantity"))?.value()? {
        Value::Uint(quantity) => Some(*quantity),
        _ => None,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("datatree=debug".parse()?))
        .init();

    let tree = DataTree::with_config(
        schema()?,
        DataTreeConfig::default()
            .with_name("inventory")
            .with_dispatch(DispatchMode::Queued),
    );

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let _registration = tree.register_data_change_listener(
        &items().node("items"),
        move |event: &DataChangeEvent| {
            let mut sink = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for path in event.created_data().keys() {
                sink.push(format!("created {path}"));
            }
            for path in event.updated_data().keys() {
                sink.push(format!("updated {path}"));
            }
            for path in event.removed_paths() {
                sink.push(format!("removed {path}"));
            }
        },
        DataChangeScope::Subtree,
    );

    let mut modification = tree.take_snapshot().new_modification();
    modification.write(
        &InstanceIdentifier::root().node("warehouse"),
        ContainerNode::container("warehouse")
            .with_child(LeafNode::new("name", "north"))
            .into(),
    )?;
    modification.write(&items().child(item("bolt")), stock("bolt", 500))?;
    modification.write(&items().child(item("nut")), stock("nut", 800))?;
    let version = tree.submit(modification)?;
    info!(%version, "stocked warehouse");

    // Two clerks sell bolts from the same snapshot; the second has to retry.
    let snapshot = tree.take_snapshot();
    let mut first = snapshot.new_modification();
    let mut second = snapshot.new_modification();
    let bolts = quantity(&snapshot, "bolt").ok_or_else(|| anyhow!("no bolts"))?;
    let path = items().child(item("bolt")).node("quantity");
    first.write(&path, LeafNode::new("quantity", bolts - 20).into())?;
    second.write(&path, LeafNode::new("quantity", bolts - 5).into())?;

    tree.submit(first)?;
    match tree.submit(second) {
        Err(error) if error.is_conflict() => {
            info!(%error, "second sale conflicted, retrying");
            let snapshot = tree.take_snapshot();
            let bolts = quantity(&snapshot, "bolt").ok_or_else(|| anyhow!("no bolts"))?;
            let mut retry = snapshot.new_modification();
            retry.write(&path, LeafNode::new("quantity", bolts - 5).into())?;
            tree.submit(retry)?;
        }
        result => {
            result?;
        }
    }

    let mut modification = tree.take_snapshot().new_modification();
    modification.delete(&items().child(item("nut")))?;
    tree.submit(modification)?;

    tree.flush_notifications();
    let snapshot = tree.take_snapshot();
    println!("inventory at {}:", snapshot.version());
    println!("  bolts: {:?}", quantity(&snapshot, "bolt"));
    println!("  nuts: {:?}", quantity(&snapshot, "nut"));
    println!("changes seen by the listener:");
    for line in log.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).iter() {
        println!("  {line}");
    }
    Ok(())
}
