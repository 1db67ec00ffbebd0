//! Unit tests for request routing and admission control.

use std::net::TcpStream;
use std::sync::Arc;

use mockall::mock;
use quay_queue::{NamedQueue, QueueRegistry};
use quay_wire::{
    CodecError, Decoded, ErrorCode, JsonCodec, MAX_PACKET_LEN, Payload, PayloadCodec,
    ReplyCode, ReplyFrame, RequestId, parse_request,
};
use rstest::rstest;
use serde_json::json;

use super::*;
use crate::socket::SocketHandle;
use crate::tests::support::{FrameBuilder, assert_silent, read_reply, socket_pair};

mock! {
    pub Codec {}
    impl PayloadCodec for Codec {
        fn encode(&self, tree: &Payload) -> Result<Vec<u8>, CodecError>;
        fn decode(&self, bytes: &[u8]) -> Result<Decoded, CodecError>;
    }
}

struct Harness {
    queue: Arc<NamedQueue<QueueEntry>>,
    stats: Arc<Stats>,
    dispatcher: Dispatcher,
}

fn harness_with(
    queue: NamedQueue<QueueEntry>,
    codec: Arc<dyn PayloadCodec>,
    policy: AdmissionPolicy,
    modules: Vec<String>,
) -> Harness {
    let registry = Arc::new(QueueRegistry::new());
    let queue = registry.register(queue).expect("register queue");
    let stats = Arc::new(Stats::new());
    let dispatcher = Dispatcher::new(
        registry,
        codec,
        Arc::clone(&stats),
        policy,
        SystemCommands::new(modules),
    );
    Harness {
        queue,
        stats,
        dispatcher,
    }
}

fn harness(policy: AdmissionPolicy) -> Harness {
    harness_with(
        NamedQueue::new("orders"),
        Arc::new(JsonCodec::default()),
        policy,
        Vec::new(),
    )
}

fn relaxed() -> AdmissionPolicy {
    AdmissionPolicy::new(512, 1024, 100)
}

fn submit(harness: &Harness, socket: &SocketHandle, request: &FrameBuilder) -> Dispatched {
    let body = request.request_body();
    let frame = parse_request(&body).expect("well-formed request");
    let ctx = RequestContext::from_frame(socket, &frame);
    harness.dispatcher.handle_event(&ctx, frame.payload)
}

fn decode_value(client: &mut TcpStream) -> Payload {
    match read_reply(client) {
        ReplyFrame::Value { code, value, .. } => {
            assert_eq!(code, ReplyCode::OK);
            serde_json::from_slice(&value).expect("JSON reply value")
        }
        other => panic!("expected a value reply, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[test]
fn known_event_is_queued_with_its_payload() {
    let harness = harness(relaxed());
    let (socket, mut client) = socket_pair(2);
    let request = FrameBuilder::new("orders")
        .asynchronous()
        .command(7)
        .body(br#"{"sku":"A-1","qty":2}"#);

    assert_eq!(submit(&harness, &socket, &request), Dispatched::Queued);

    let entry = harness.queue.try_pop().expect("queued entry");
    assert_eq!(entry.event(), Some("orders"));
    assert_eq!(entry.operation(), 7);
    assert_eq!(entry.payload(), &json!({"sku": "A-1", "qty": 2}));
    assert_eq!(entry.request().connection(), socket.id());
    assert_silent(&mut client);
}

#[test]
fn queued_entry_does_not_hold_the_connection() {
    let harness = harness(relaxed());
    let (socket, _client) = socket_pair(3);
    submit(&harness, &socket, &FrameBuilder::new("orders").asynchronous());
    assert_eq!(socket.ref_count(), 1);
    let entry = harness.queue.try_pop().expect("queued entry");
    drop(socket);
    assert!(entry.request().socket().is_closed());
}

#[test]
fn unknown_event_is_refused_with_its_request_id() {
    let harness = harness(relaxed());
    let (socket, mut client) = socket_pair(4);
    let outcome = submit(&harness, &socket, &FrameBuilder::new("refunds").id(91));

    assert_eq!(outcome, Dispatched::Rejected(RequestError::UnknownRequest));
    assert_eq!(
        read_reply(&mut client),
        ReplyFrame::Error {
            id: RequestId::new(91),
            code: ErrorCode::UnknownRequest,
        }
    );
    assert_eq!(harness.stats.snapshot().net_unknown_req, 1);
    assert!(harness.queue.is_empty());
}

#[test]
fn asynchronous_failures_send_nothing() {
    let harness = harness(relaxed());
    let (socket, mut client) = socket_pair(5);
    let outcome = submit(&harness, &socket, &FrameBuilder::new("refunds").asynchronous());
    assert_eq!(outcome, Dispatched::Rejected(RequestError::UnknownRequest));
    assert_silent(&mut client);
}

#[rstest]
#[case::truncated_json(br#"{"sku":"#.as_slice())]
#[case::not_json(b"<xml/>".as_slice())]
#[case::empty(b"".as_slice())]
fn undecodable_payload_counts_as_broken(#[case] body: &[u8]) {
    let harness = harness(relaxed());
    let (socket, mut client) = socket_pair(6);
    let outcome = submit(&harness, &socket, &FrameBuilder::new("orders").id(12).body(body));

    assert_eq!(outcome, Dispatched::Rejected(RequestError::Malformed));
    assert_eq!(
        read_reply(&mut client),
        ReplyFrame::Error {
            id: RequestId::new(12),
            code: ErrorCode::Broken,
        }
    );
    assert_eq!(harness.stats.snapshot().net_broken_req, 1);
    assert!(!socket.is_closed());
}

#[test]
fn event_name_running_past_payload_is_broken() {
    let harness = harness(relaxed());
    let (socket, _client) = socket_pair(7);
    let mut body = FrameBuilder::new("orders").asynchronous().request_body();
    // Overwrite the name length with a value larger than the payload.
    body.splice(8..12, 200_u32.to_be_bytes());
    let frame = parse_request(&body).expect("header still valid");
    let ctx = RequestContext::from_frame(&socket, &frame);

    let outcome = harness.dispatcher.handle_event(&ctx, frame.payload);
    assert_eq!(outcome, Dispatched::Rejected(RequestError::Malformed));
}

#[test]
fn decoded_payload_over_packet_limit_is_broken() {
    let mut codec = MockCodec::new();
    codec.expect_decode().returning(|_| {
        Ok(Decoded {
            tree: json!({}),
            consumed: MAX_PACKET_LEN,
        })
    });
    let harness = harness_with(
        NamedQueue::new("orders"),
        Arc::new(codec),
        relaxed(),
        Vec::new(),
    );
    let (socket, _client) = socket_pair(8);
    let outcome = submit(&harness, &socket, &FrameBuilder::new("orders").asynchronous());
    assert_eq!(outcome, Dispatched::Rejected(RequestError::Malformed));
    assert!(harness.queue.is_empty());
}

// ---------------------------------------------------------------------------
// Admission control
// ---------------------------------------------------------------------------

#[rstest]
#[case::at_threshold(3, Dispatched::Queued)]
#[case::one_over(4, Dispatched::Rejected(RequestError::Busy))]
#[case::well_over(9, Dispatched::Rejected(RequestError::Busy))]
fn busy_threshold_is_exclusive(#[case] backlog: usize, #[case] expected: Dispatched) {
    let harness = harness(AdmissionPolicy::new(1, 3, 1));
    let (socket, _client) = socket_pair(9);
    {
        let mut guard = harness.queue.lock();
        for command in 0..backlog {
            let filler = FrameBuilder::new("orders")
                .asynchronous()
                .command(u16::try_from(command).expect("small command"));
            let body = filler.request_body();
            let frame = parse_request(&body).expect("filler");
            let ctx = RequestContext::from_frame(&socket, &frame);
            let entry = QueueEntry::new(&ctx, b"orders", json!({})).expect("entry");
            guard.push(entry).expect("unbounded queue");
        }
    }

    let outcome = submit(&harness, &socket, &FrameBuilder::new("orders").asynchronous());
    assert_eq!(outcome, expected);
    let busy = u64::from(expected == Dispatched::Rejected(RequestError::Busy));
    assert_eq!(harness.stats.snapshot().proc_busy, busy);
}

#[test]
fn busy_refusal_replies_to_synchronous_requests() {
    let harness = harness(AdmissionPolicy::new(0, 0, 1));
    let (socket, mut client) = socket_pair(10);
    submit(&harness, &socket, &FrameBuilder::new("orders").asynchronous());

    let outcome = submit(&harness, &socket, &FrameBuilder::new("orders").id(33).command(2));
    assert_eq!(outcome, Dispatched::Rejected(RequestError::Busy));
    assert_eq!(
        read_reply(&mut client),
        ReplyFrame::Error {
            id: RequestId::new(33),
            code: ErrorCode::Busy,
        }
    );
}

#[test]
fn full_bounded_queue_maps_to_busy() {
    let harness = harness_with(
        NamedQueue::bounded("orders", 1),
        Arc::new(JsonCodec::default()),
        relaxed(),
        Vec::new(),
    );
    let (socket, _client) = socket_pair(11);
    let first = FrameBuilder::new("orders").asynchronous();
    assert_eq!(submit(&harness, &socket, &first), Dispatched::Queued);
    assert_eq!(
        submit(&harness, &socket, &first),
        Dispatched::Rejected(RequestError::Busy)
    );
    assert_eq!(harness.queue.len(), 1);
}

#[rstest]
#[case(0, 10, 100, Admission::Accept)]
#[case(10, 10, 100, Admission::Accept)]
#[case(11, 10, 100, Admission::Accept)]
#[case(200, 10, 100, Admission::Warn)]
#[case(1025, 10, 100, Admission::Busy)]
#[case(1024, 10, 100, Admission::Accept)]
#[case(1024, 10, 1, Admission::Warn)]
fn admission_assessment(
    #[case] size: usize,
    #[case] warning: usize,
    #[case] interval: usize,
    #[case] expected: Admission,
) {
    let policy = AdmissionPolicy::new(warning, 1024, interval);
    assert_eq!(policy.assess(size), expected);
}

#[test]
fn zero_interval_is_treated_as_one() {
    let policy = AdmissionPolicy::new(0, 10, 0);
    assert_eq!(policy.assess(3), Admission::Warn);
    assert!(policy.reports(7));
}

// ---------------------------------------------------------------------------
// Duplicate suppression
// ---------------------------------------------------------------------------

#[test]
fn repeated_synchronous_request_replaces_queued_one() {
    let harness = harness(relaxed());
    let (socket, _client) = socket_pair(12);
    let first = FrameBuilder::new("orders").id(1).body(br#"{"v":1}"#);
    let second = FrameBuilder::new("orders").id(2).body(br#"{"v":2}"#);

    assert_eq!(submit(&harness, &socket, &first), Dispatched::Queued);
    assert_eq!(submit(&harness, &socket, &second), Dispatched::Replaced);

    assert_eq!(harness.queue.len(), 1);
    let entry = harness.queue.try_pop().expect("entry");
    assert_eq!(entry.payload(), &json!({"v": 2}));
    assert_eq!(entry.request().id(), RequestId::new(2));
}

#[rstest]
#[case::different_command(FrameBuilder::new("orders").command(2))]
#[case::asynchronous(FrameBuilder::new("orders").asynchronous())]
fn distinct_requests_are_not_replaced(#[case] second: FrameBuilder) {
    let harness = harness(relaxed());
    let (socket, _client) = socket_pair(13);
    submit(&harness, &socket, &FrameBuilder::new("orders"));
    assert_eq!(submit(&harness, &socket, &second), Dispatched::Queued);
    assert_eq!(harness.queue.len(), 2);
}

#[test]
fn requests_from_other_connections_are_not_replaced() {
    let harness = harness(relaxed());
    let (first, _first_client) = socket_pair(14);
    let (second, _second_client) = socket_pair(15);
    submit(&harness, &first, &FrameBuilder::new("orders"));
    assert_eq!(
        submit(&harness, &second, &FrameBuilder::new("orders")),
        Dispatched::Queued
    );
    assert_eq!(harness.queue.len(), 2);
}

// ---------------------------------------------------------------------------
// Reserved events
// ---------------------------------------------------------------------------

#[test]
fn status_query_reports_counters_without_queueing() {
    let harness = harness(relaxed());
    let (socket, mut client) = socket_pair(16);
    harness.stats.record_error(RequestError::Busy);

    let outcome = submit(&harness, &socket, &FrameBuilder::new(STATUS_EVENT));
    assert_eq!(outcome, Dispatched::System);
    let value = decode_value(&mut client);
    assert_eq!(value["proc_busy"], json!(1));
    assert_eq!(value["msg_tcp"], json!(0));
    assert!(harness.queue.is_empty());
}

#[test]
fn status_query_can_reset_counters() {
    let harness = harness(relaxed());
    let (socket, mut client) = socket_pair(17);
    harness.stats.record_error(RequestError::UnknownRequest);

    submit(
        &harness,
        &socket,
        &FrameBuilder::new(STATUS_EVENT).body(br#"{"reset":true}"#),
    );
    let value = decode_value(&mut client);
    assert_eq!(value["net_unknown_req"], json!(1));
    assert_eq!(harness.stats.snapshot().net_unknown_req, 0);
}

#[test]
fn client_module_query_lists_modules() {
    let harness = harness_with(
        NamedQueue::new("orders"),
        Arc::new(JsonCodec::default()),
        relaxed(),
        vec!["billing".to_owned(), "audit".to_owned()],
    );
    let (socket, mut client) = socket_pair(18);
    submit(&harness, &socket, &FrameBuilder::new(CLIENT_MODULES_EVENT));
    assert_eq!(
        decode_value(&mut client),
        json!({"modules": ["billing", "audit"]})
    );
}

#[rstest]
#[case::no_modules(CLIENT_MODULES_EVENT)]
#[case::unknown_reserved("_Reserve.Reboot")]
fn unserved_reserved_events_are_unknown(#[case] event: &str) {
    let harness = harness(relaxed());
    let (socket, mut client) = socket_pair(19);
    let outcome = submit(&harness, &socket, &FrameBuilder::new(event).id(5));
    assert_eq!(outcome, Dispatched::Rejected(RequestError::UnknownRequest));
    assert_eq!(
        read_reply(&mut client),
        ReplyFrame::Error {
            id: RequestId::new(5),
            code: ErrorCode::UnknownRequest,
        }
    );
}

#[test]
fn reserved_names_shadow_registered_queues() {
    let harness = harness_with(
        NamedQueue::new(STATUS_EVENT),
        Arc::new(JsonCodec::default()),
        relaxed(),
        Vec::new(),
    );
    let (socket, _client) = socket_pair(20);
    let outcome = submit(&harness, &socket, &FrameBuilder::new(STATUS_EVENT).asynchronous());
    assert_eq!(outcome, Dispatched::System);
    assert!(harness.queue.is_empty());
}

#[test]
fn other_reserve_prefixed_names_route_to_their_queue() {
    let harness = harness_with(
        NamedQueue::new("_Reserve.Chat"),
        Arc::new(JsonCodec::default()),
        relaxed(),
        Vec::new(),
    );
    let (socket, _client) = socket_pair(21);
    let outcome = submit(&harness, &socket, &FrameBuilder::new("_Reserve.Chat"));
    assert_eq!(outcome, Dispatched::Queued);
    assert_eq!(harness.queue.len(), 1);
    assert!(!is_reserved(b"_Reserve.Chat"));
    assert!(is_reserved(STATUS_EVENT.as_bytes()));
}
