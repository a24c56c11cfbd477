use std::collections::BTreeSet;

use crate::models::common::EntityKind;

/// Direct prerequisites of each entity kind.
///
/// Event and Pool/Token depend on each other: events need pool and token metadata,
/// while pools and tokens are discovered from events. The closure below walks the
/// full map; execution order comes from [`discovery_dependencies`].
pub fn dependencies(kind: EntityKind) -> &'static [EntityKind] {
    use EntityKind::*;
    match kind {
        RawBlock | RawReceipt | RawTrace => &[],
        Block | Transaction | Withdrawal => &[RawBlock],
        Receipt | Log => &[RawReceipt],
        Transfer => &[Log],
        Event => &[Log, Block, Pool, Token],
        Pool => &[Event],
        Token => &[Pool],
        Account => &[Receipt],
        Contract => &[Receipt, Log],
        Trace => &[RawTrace],
    }
}

/// Prerequisites for the discovery pass. Identical to [`dependencies`] except that
/// Event no longer waits for Pool/Token, which makes the graph acyclic. Pool/Token
/// metadata flows back into events in a separate enrichment pass.
pub fn discovery_dependencies(kind: EntityKind) -> &'static [EntityKind] {
    match kind {
        EntityKind::Event => &[EntityKind::Log, EntityKind::Block],
        other => dependencies(other),
    }
}

/// The requested kinds plus every transitive prerequisite.
pub fn resolve(targets: &BTreeSet<EntityKind>) -> BTreeSet<EntityKind> {
    let mut resolved = BTreeSet::new();
    let mut stack: Vec<EntityKind> = targets.iter().copied().collect();

    while let Some(kind) = stack.pop() {
        // Already-visited kinds stop the walk, so cycles terminate
        if resolved.insert(kind) {
            stack.extend(dependencies(kind).iter().copied());
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use EntityKind::*;

    #[test]
    fn test_resolve_event_is_fixed_point() {
        let resolved = resolve(&BTreeSet::from([Event]));
        for kind in [Event, Log, Block, Pool, Token, RawBlock, RawReceipt] {
            assert!(resolved.contains(&kind), "missing {kind}");
        }
        assert!(!resolved.contains(&Trace));
        assert_eq!(resolve(&resolved), resolved);
    }

    #[test]
    fn test_resolve_simple_kinds() {
        assert_eq!(
            resolve(&BTreeSet::from([Transaction, Withdrawal])),
            BTreeSet::from([RawBlock, Transaction, Withdrawal])
        );
        assert_eq!(
            resolve(&BTreeSet::from([Contract])),
            BTreeSet::from([RawReceipt, Receipt, Log, Contract])
        );
        assert!(resolve(&BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_resolve_from_pool_pulls_in_events() {
        let resolved = resolve(&BTreeSet::from([Token]));
        assert!(resolved.contains(&Event));
        assert!(resolved.contains(&Pool));
    }

    #[test]
    fn test_discovery_graph_is_acyclic() {
        // Kahn's algorithm over every kind must consume the whole graph
        let mut remaining: BTreeSet<EntityKind> = EntityKind::ALL.into_iter().collect();
        while !remaining.is_empty() {
            let ready: Vec<_> = remaining
                .iter()
                .copied()
                .filter(|kind| {
                    discovery_dependencies(*kind)
                        .iter()
                        .all(|dep| !remaining.contains(dep))
                })
                .collect();
            assert!(!ready.is_empty(), "cycle among {remaining:?}");
            for kind in ready {
                remaining.remove(&kind);
            }
        }
    }

    #[test]
    fn test_discovery_dependencies_subset_of_full_map() {
        for kind in EntityKind::ALL {
            for dep in discovery_dependencies(kind) {
                assert!(dependencies(kind).contains(dep));
            }
        }
    }
}
