//! Protocol invariants asserted under randomized workloads.

use lantern_core::{AdminJoin, Environment, DEDUPE_CAPACITY};
use lantern_harness::SimMesh;
use lantern_node::MeshStore;
use proptest::prelude::*;

/// A randomized single-hub workload: node count, admin presence, and a
/// sequence of sends.
#[derive(Debug, Clone)]
struct Workload {
    seed: u64,
    node_count: usize,
    ops: Vec<Op>,
}

#[derive(Debug, Clone)]
enum Op {
    Broadcast { sender: usize, ttl: u8 },
    E2e { sender: usize },
}

fn arb_workload() -> impl Strategy<Value = Workload> {
    (
        any::<u64>(),
        2usize..6,
        proptest::collection::vec(
            prop_oneof![
                (0usize..6, 1u8..=8).prop_map(|(sender, ttl)| Op::Broadcast { sender, ttl }),
                (0usize..6).prop_map(|sender| Op::E2e { sender }),
            ],
            1..25,
        ),
    )
        .prop_map(|(seed, node_count, ops)| Workload { seed, node_count, ops })
}

/// Build the mesh, apply the workload, return it for inspection. Node 0 is
/// always the admin.
fn run_workload(workload: &Workload) -> SimMesh {
    let mut mesh = SimMesh::new(workload.seed);
    let hub = mesh.add_hub();

    let admin = mesh.add_node(true);
    mesh.attach(admin, hub);
    for _ in 1..workload.node_count {
        let n = mesh.add_node(false);
        mesh.attach(n, hub);
    }

    for op in &workload.ops {
        match *op {
            Op::Broadcast { sender, ttl } => {
                let sender = sender % workload.node_count;
                mesh.broadcast(sender, "payload", ttl);
            },
            Op::E2e { sender } => {
                let sender = sender % workload.node_count;
                mesh.send_e2e(sender, admin, "sealed payload");
            },
        }
    }
    mesh
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Invariant: for any node and message id, the message handler fires at
    /// most once.
    #[test]
    fn no_duplicate_delivery(workload in arb_workload()) {
        let mesh = run_workload(&workload);

        for n in 0..workload.node_count {
            let mut ids: Vec<_> =
                mesh.node(n).delivered.iter().map(|env| env.msg_id).collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), total, "node {} saw a duplicate delivery", n);
        }
    }

    /// Invariant: a delivered envelope's spent budget equals its extra hops,
    /// and the hop count never exceeds the origin budget.
    #[test]
    fn ttl_accounts_for_hops(workload in arb_workload()) {
        let mesh = run_workload(&workload);

        for n in 0..workload.node_count {
            for env in &mesh.node(n).delivered {
                let origin_ttl = env.ttl as usize + env.hops.len() - 1;
                prop_assert!(origin_ttl <= 8, "budget inflated in transit");
                prop_assert!(env.hops.len() <= origin_ttl + 1, "path longer than budget");
            }
        }
    }

    /// Invariant: every broadcast on a single hub reaches every other node
    /// exactly once (ttl ≥ 1 suffices for one shared hub).
    #[test]
    fn single_hub_round_trip(workload in arb_workload()) {
        let mesh = run_workload(&workload);

        let broadcast_ids: Vec<_> = mesh
            .node(0)
            .store
            .messages()
            .unwrap()
            .into_iter()
            .filter(|env| env.kind == lantern_proto::MessageKind::Broadcast)
            .map(|env| env.msg_id)
            .collect();

        for msg_id in broadcast_ids {
            for n in 0..workload.node_count {
                prop_assert_eq!(
                    mesh.node(n).delivery_count(msg_id),
                    1,
                    "node {} missed or duplicated {}",
                    n,
                    msg_id
                );
            }
        }
    }

    /// Invariant: the dedupe store never exceeds its cap.
    #[test]
    fn dedupe_bound_holds(workload in arb_workload()) {
        let mesh = run_workload(&workload);
        for n in 0..workload.node_count {
            prop_assert!(mesh.node(n).relay.dedupe_len() <= DEDUPE_CAPACITY);
        }
    }

    /// Invariant: only the admin ever emits decrypted messages, and it emits
    /// one per e2e send.
    #[test]
    fn key_independence(workload in arb_workload()) {
        let mesh = run_workload(&workload);

        let e2e_count =
            workload.ops.iter().filter(|op| matches!(op, Op::E2e { .. })).count();
        prop_assert_eq!(mesh.node(0).decrypted.len(), e2e_count);

        for n in 1..workload.node_count {
            prop_assert!(
                mesh.node(n).decrypted.is_empty(),
                "non-admin node {} decrypted something",
                n
            );
        }
    }

    /// Invariant: replaying the admin's log into a fresh join reproduces
    /// exactly the same decrypted set.
    #[test]
    fn join_replay_is_idempotent(workload in arb_workload()) {
        let mesh = run_workload(&workload);
        let admin_state = mesh.node(0);

        let secret = admin_state.admin_keys.as_ref().unwrap().secret.clone();
        let mut replay = AdminJoin::new(Some(secret));
        let mut replayed = Vec::new();

        let now = mesh.env().now();
        for env in admin_state.store.messages().unwrap() {
            if let Ok(Some(d)) = replay.offer_message(&env, now) {
                replayed.push((d.msg_id, d.content));
            }
        }
        for key in admin_state.store.keys().unwrap() {
            if let Ok(Some(d)) = replay.offer_key(&key, now) {
                replayed.push((d.msg_id, d.content));
            }
        }

        let mut live: Vec<_> = admin_state
            .decrypted
            .iter()
            .map(|d| (d.msg_id, d.content.clone()))
            .collect();
        live.sort();
        replayed.sort();
        prop_assert_eq!(replayed, live);
    }
}
