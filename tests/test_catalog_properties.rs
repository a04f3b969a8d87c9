//! Property tests for catalog refresh diffs

use agent_mesh::discovery::ServiceCatalog;
use agent_mesh::service::{Endpoint, ServiceInstance, ServiceStatus};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn instance(id: u8, port: u16, healthy: bool) -> ServiceInstance {
    let status = if healthy {
        ServiceStatus::Healthy
    } else {
        ServiceStatus::Unhealthy
    };
    ServiceInstance::new(
        format!("svc-{id}"),
        format!("svc-{id}"),
        "diagnosis",
        Endpoint::http("10.0.0.1", port, false),
    )
    .with_status(status)
}

fn fleet() -> impl Strategy<Value = Vec<ServiceInstance>> {
    prop::collection::vec((0u8..12, 9000u16..9003, any::<bool>()), 0..10).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(id, port, healthy)| instance(id, port, healthy))
            .collect()
    })
}

fn ids(instances: &[ServiceInstance]) -> BTreeSet<String> {
    instances.iter().map(|i| i.id.clone()).collect()
}

proptest! {
    #[test]
    fn diff_partitions_old_and_new_ids(before in fleet(), after in fleet()) {
        let catalog = ServiceCatalog::new();
        catalog.apply(before.clone());
        let diff = catalog.apply(after.clone());

        let old = ids(&before);
        let new = ids(&after);
        let added: BTreeSet<String> = diff.added.iter().cloned().collect();
        let updated: BTreeSet<String> = diff.updated.iter().cloned().collect();
        let removed: BTreeSet<String> = diff.removed.iter().cloned().collect();

        prop_assert_eq!(&added, &new.difference(&old).cloned().collect::<BTreeSet<_>>());
        prop_assert_eq!(&removed, &old.difference(&new).cloned().collect::<BTreeSet<_>>());
        prop_assert!(updated.is_subset(&old.intersection(&new).cloned().collect()));
        prop_assert!(added.is_disjoint(&updated));

        let held: BTreeSet<String> = catalog.instances().iter().map(|i| i.id.clone()).collect();
        prop_assert_eq!(held, new);
    }

    #[test]
    fn diff_lists_are_sorted(before in fleet(), after in fleet()) {
        let catalog = ServiceCatalog::new();
        catalog.apply(before);
        let diff = catalog.apply(after);

        for list in [&diff.added, &diff.updated, &diff.removed] {
            let mut sorted = list.clone();
            sorted.sort();
            prop_assert_eq!(list, &sorted);
        }
    }

    #[test]
    fn reapplying_same_fleet_is_a_noop(services in fleet()) {
        let catalog = ServiceCatalog::new();
        catalog.apply(services.clone());
        let diff = catalog.apply(services);
        prop_assert!(diff.is_empty());
    }
}
