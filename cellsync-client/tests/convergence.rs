//! Replicas driven against the real engine, request by request, the way
//! the actors would, minus the threads. With requests fully serialized,
//! every response catches its caller up to the current iteration, so a
//! checked snapshot must verify at any point; these tests lean on that.

use proptest::prelude::ProptestConfig;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use test_strategy::proptest;

use cellsync_client::{CellStore, Replica, TreapStore, VecStore};
use cellsync_common::{Cell, ClientId, Request, Response, Settings};
use cellsync_server::{ServerService, Service};

fn seeded_server(cells: u64, settings: &Settings) -> ServerService {
    let cells = (1..=cells).map(|id| Cell::new(id, id as u32 * 10)).collect();
    ServerService::new(cells, settings)
}

fn load<S: CellStore>(
    server: &mut ServerService,
    client: ClientId,
    replica: &mut Replica<S>,
    check: bool,
) {
    let response = server.handle(
        client,
        Request::LoadState {
            previous: replica.iteration(),
        },
    );
    assert!(matches!(response, Response::State { .. }));
    replica.apply_response(&response, check).unwrap();
}

/// One random request round-trip for `client`.
fn step<S: CellStore>(
    server: &mut ServerService,
    client: ClientId,
    replica: &mut Replica<S>,
    rng: &mut SmallRng,
) {
    let previous = replica.iteration();
    let request = match rng.random_range(0u8..8) {
        // Updates and deletes need a live pick; fall back to a sync on an
        // empty replica.
        0..=2 => replica
            .pick_update(rng)
            .map(|(id, value)| Request::UpdateValue {
                previous,
                id,
                value,
            })
            .unwrap_or(Request::Sync { previous }),
        3..=5 => Request::InsertValue {
            previous,
            near: replica.pick_insert_anchor(rng),
            value: rng.random(),
        },
        6 => replica
            .pick_delete(rng)
            .map(|id| Request::DeleteValue { previous, id })
            .unwrap_or(Request::Sync { previous }),
        _ => Request::Sync { previous },
    };
    let response = server.handle(client, request);
    replica.apply_response(&response, false).unwrap();
}

#[proptest(ProptestConfig { cases: 64, ..ProptestConfig::default() })]
fn replicas_converge_under_random_workloads(#[strategy(0u64..10_000)] seed: u64) {
    let settings = Settings::default();
    let mut server = seeded_server(8, &settings);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut slow = Replica::new(VecStore::new());
    let mut fast_a = Replica::new(TreapStore::with_seed(seed));
    let mut fast_b = Replica::new(TreapStore::with_seed(seed.wrapping_add(1)));

    for client in 1..=3 {
        server.connect(client);
    }
    load(&mut server, 1, &mut slow, false);
    load(&mut server, 2, &mut fast_a, false);
    load(&mut server, 3, &mut fast_b, false);

    for _ in 0..40 {
        step(&mut server, 1, &mut slow, &mut rng);
        step(&mut server, 2, &mut fast_a, &mut rng);
        step(&mut server, 3, &mut fast_b, &mut rng);
    }

    // Every replica, checked against a fresh snapshot, matches the server
    // cell for cell; and they therefore match each other.
    load(&mut server, 1, &mut slow, true);
    load(&mut server, 2, &mut fast_a, true);
    load(&mut server, 3, &mut fast_b, true);
    assert_eq!(slow.cells(), server.snapshot());
    assert_eq!(fast_a.cells(), server.snapshot());
    assert_eq!(fast_b.cells(), server.snapshot());
    assert_eq!(slow.pending(), 0);
    assert_eq!(fast_a.pending(), 0);
}

/// A client that stays quiet pins compaction; when it finally syncs it
/// still reconciles from deltas alone, snapshot checking included.
#[proptest(ProptestConfig { cases: 64, ..ProptestConfig::default() })]
fn a_lagging_replica_catches_up_from_deltas_alone(#[strategy(0u64..10_000)] seed: u64) {
    let settings = Settings::default();
    let mut server = seeded_server(6, &settings);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut busy = Replica::new(TreapStore::with_seed(seed));
    let mut lagging = Replica::new(VecStore::new());
    server.connect(1);
    server.connect(2);
    load(&mut server, 1, &mut busy, false);
    load(&mut server, 2, &mut lagging, false);

    // Client 1 churns; client 2 hears nothing meanwhile, so the history
    // must retain everything client 2 has not acknowledged.
    for _ in 0..50 {
        step(&mut server, 1, &mut busy, &mut rng);
    }

    let response = server.handle(
        2,
        Request::Sync {
            previous: lagging.iteration(),
        },
    );
    lagging.apply_response(&response, false).unwrap();
    assert_eq!(lagging.cells(), server.snapshot());
    assert_eq!(lagging.iteration(), server.iteration());

    load(&mut server, 2, &mut lagging, true);
}

#[test]
fn the_s3_interleaving_at_the_replica_level() {
    let settings = Settings::default();
    let mut server = ServerService::new(vec![Cell::new(1, 10), Cell::new(2, 20)], &settings);
    let mut a = Replica::new(VecStore::new());
    let mut b = Replica::new(VecStore::new());
    server.connect(1);
    server.connect(2);
    load(&mut server, 1, &mut a, false);
    load(&mut server, 2, &mut b, false);

    // A inserts 30 after cell 1; B updates cell 2 without having seen it.
    let response = server.handle(
        1,
        Request::InsertValue {
            previous: a.iteration(),
            near: 1,
            value: 30,
        },
    );
    a.apply_response(&response, false).unwrap();

    let response = server.handle(
        2,
        Request::UpdateValue {
            previous: b.iteration(),
            id: 2,
            value: 99,
        },
    );
    b.apply_response(&response, false).unwrap();
    assert_eq!(
        b.cells(),
        vec![Cell::new(1, 10), Cell::new(3, 30), Cell::new(2, 99)],
    );

    // A converges through a sync.
    let response = server.handle(1, Request::Sync { previous: a.iteration() });
    a.apply_response(&response, false).unwrap();
    assert_eq!(a.cells(), b.cells());
}

/// With delayed history on, mutating responses teach the caller nothing;
/// a later sync delivers the batch whole and convergence still holds.
#[proptest(ProptestConfig { cases: 32, ..ProptestConfig::default() })]
fn delayed_history_converges_after_a_sync(#[strategy(0u64..10_000)] seed: u64) {
    let settings = Settings {
        delayed_history: true,
        ..Settings::default()
    };
    let mut server = seeded_server(5, &settings);
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut replica = Replica::new(TreapStore::with_seed(seed));
    server.connect(1);
    load(&mut server, 1, &mut replica, false);

    for _ in 0..20 {
        step(&mut server, 1, &mut replica, &mut rng);
    }
    // The replica may be behind now, but never ahead.
    assert!(replica.iteration() <= server.iteration());

    let response = server.handle(
        1,
        Request::Sync {
            previous: replica.iteration(),
        },
    );
    replica.apply_response(&response, false).unwrap();
    assert_eq!(replica.cells(), server.snapshot());
    load(&mut server, 1, &mut replica, true);
}
