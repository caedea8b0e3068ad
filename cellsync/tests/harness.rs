//! Whole-system smoke tests: real threads, real bus, snapshot checking on.

use std::sync::Arc;
use std::time::Duration;

use cellsync::actors::ServerActor;
use cellsync_bus::{Bus, Endpoint, Envelope};
use cellsync_common::{Cell, Payload, Request, Response, Settings, SERVER_MAILBOX};
use cellsync_server::NopService;

fn quick_settings() -> Settings {
    Settings {
        clients: 3,
        initial_cells: 20,
        run_for: Duration::from_millis(400),
        think_time: Duration::from_millis(5),
        send_load_state: true,
        send_sync: true,
        check_state: true,
        delayed_history: false,
        message_sizes: true,
        seed: Some(0xC311),
    }
}

#[test]
fn a_short_checked_run_shuts_down_cleanly() {
    let stats = cellsync::run(quick_settings()).expect("clean run");
    assert_eq!(stats.len(), 3);
    for client in &stats {
        // Every client got at least its initial load through.
        assert!(client.round_trips > 0, "client {} never round-tripped", client.client);
        assert!(client.sent_bytes > 0);
        assert!(client.received_bytes > 0);
    }
}

#[test]
fn delayed_history_run_shuts_down_cleanly() {
    let settings = Settings {
        delayed_history: true,
        ..quick_settings()
    };
    let stats = cellsync::run(settings).expect("clean run");
    assert_eq!(stats.len(), 3);
}

/// Drive the server actor over the bus by hand: one request, one response,
/// then poison. The whole protocol without the client actor in between.
#[test]
fn the_server_actor_answers_over_the_bus() {
    let settings = Settings::default();
    let bus = Bus::new(2);
    let server = ServerActor::new(
        Endpoint::new(Arc::clone(&bus), SERVER_MAILBOX),
        vec![Cell::new(1, 10)],
        &settings,
    );
    let tester = Endpoint::new(bus, 1);

    let server_thread = std::thread::spawn(move || server.run());

    let send = |payload: Payload| {
        tester
            .send(
                SERVER_MAILBOX,
                Envelope {
                    kind: payload.kind(),
                    sender: 0,
                    size: payload.size_hint(),
                    payload,
                },
            )
            .unwrap();
    };
    send(Payload::Ping);
    assert_eq!(tester.recv().payload, Payload::Pong);

    send(Payload::Connect);
    send(Payload::Request(Request::LoadState { previous: 0 }));

    let received = tester.recv();
    match received.payload {
        Payload::Response(Response::State { cells, deltas }) => {
            assert_eq!(cells, vec![Cell::new(1, 10)]);
            assert!(deltas.is_empty());
        }
        other => panic!("expected a state response, got {other:?}"),
    }

    send(Payload::Poison);
    server_thread.join().unwrap();
}

/// The actor loop itself needs no state behind it: a nop service drains
/// its mailbox and dies on poison.
#[test]
fn the_nop_server_runs_dry_on_poison() {
    let bus = Bus::new(2);
    let actor = ServerActor::over(
        Endpoint::new(Arc::clone(&bus), SERVER_MAILBOX),
        NopService,
        &Settings::default(),
    );
    let tester = Endpoint::new(bus, 1);
    tester
        .send(
            SERVER_MAILBOX,
            Envelope {
                kind: Payload::Poison.kind(),
                sender: 0,
                size: 0,
                payload: Payload::Poison,
            },
        )
        .unwrap();
    actor.run();
}

/// Text payloads travel the bus intact; the oldest smoke test there is.
#[test]
fn text_messages_round_trip() {
    let bus = Bus::new(1);
    let endpoint = Endpoint::new(bus, 0);
    let payload = Payload::Text("Hello world!".into());
    endpoint
        .send(
            0,
            Envelope {
                kind: payload.kind(),
                sender: 0,
                size: payload.size_hint(),
                payload,
            },
        )
        .unwrap();
    let received = endpoint.recv();
    assert_eq!(received.payload, Payload::Text("Hello world!".into()));
    assert_eq!(received.size, 12);
}
