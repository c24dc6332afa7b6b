mod common;

use common::{MockLink, MockTransport, hash, transfer};
use std::cell::Cell;
use uvnode::core::{NodeId, PortId, Priority, TransferId};
use uvnode::frame::{HEADER_LENGTH, TransferKind};
use uvnode::node::Node;
use uvnode::time::Instant;
use uvnode::{
    AttachError, Config, Reply, ReplyOutcome, Route, SendError, SerialTransport, Transfer,
};

const LOCAL_NODE: NodeId = NodeId::new(1).unwrap();
const SERIAL_PEER: NodeId = NodeId::new(20).unwrap();
const BUS_PEER: NodeId = NodeId::new(30).unwrap();
const PORT: PortId = PortId::new(430);
const SERVICE: &str = "uavcan.node.GetTransportStatistics.0.1";
const START: Instant = Instant::from_ticks(0);

#[test]
fn test_serial_link_takes_precedence() {
    let continuation = |_outcome: ReplyOutcome<'_>| {};
    let bus = MockTransport::new();
    let link = MockLink::new(SERIAL_PEER);
    let mut node: Node<'_> = Node::new(Config::new(LOCAL_NODE));
    node.attach_broadcast(&bus).unwrap();
    node.attach_serial(&link).unwrap();

    node.request(START, SERIAL_PEER, PORT, hash(SERVICE), Priority::Nominal, &[1], &continuation)
        .unwrap();
    assert_eq!(link.inner.sent_count(), 1);
    assert_eq!(bus.sent_count(), 0);

    node.request(START, BUS_PEER, PORT, hash(SERVICE), Priority::Nominal, &[2], &continuation)
        .unwrap();
    assert_eq!(link.inner.sent_count(), 1);
    let (header, _) = bus.take_single();
    assert_eq!(header.destination, Some(BUS_PEER));
}

#[test]
fn test_serial_only_node() {
    let continuation = |_outcome: ReplyOutcome<'_>| {};
    let link = MockLink::new(SERIAL_PEER);
    let mut node: Node<'_> = Node::new(Config::new(LOCAL_NODE));
    node.attach_serial(&link).unwrap();

    assert_eq!(
        node.request(START, BUS_PEER, PORT, hash(SERVICE), Priority::Nominal, &[], &continuation),
        Err(SendError::NoRoute)
    );
    assert_eq!(
        node.publish(PORT, hash(SERVICE), Priority::Nominal, &[], || {}),
        Err(SendError::NoRoute)
    );
    assert_eq!(node.pending_requests(), 0);
    assert_eq!(link.inner.sent_count(), 0);
}

#[test]
fn test_detach_serial() {
    let continuation = |_outcome: ReplyOutcome<'_>| {};
    let bus = MockTransport::new();
    let link = MockLink::new(SERIAL_PEER);
    let mut node: Node<'_> = Node::new(Config::new(LOCAL_NODE));
    node.attach_broadcast(&bus).unwrap();
    node.attach_serial(&link).unwrap();

    let first = node
        .request(START, SERIAL_PEER, PORT, hash(SERVICE), Priority::Nominal, &[], &continuation)
        .unwrap();
    assert_eq!(first, TransferId::new(0));

    let detached = node.detach_serial(SERIAL_PEER).unwrap();
    assert_eq!(detached.remote(), SERIAL_PEER);
    assert!(node.detach_serial(SERIAL_PEER).is_none());

    // The request sent over the link is still pending and holds transfer ID 0
    assert_eq!(node.pending_requests(), 1);
    let second = node
        .request(START, SERIAL_PEER, PORT, hash(SERVICE), Priority::Nominal, &[], &continuation)
        .unwrap();
    assert_eq!(second, TransferId::new(1));
    assert_eq!(bus.sent_count(), 1);
    assert_eq!(link.inner.sent_count(), 1);
}

#[test]
fn test_attach_limits() {
    let bus = MockTransport::new();
    let other_bus = MockTransport::new();
    let link = MockLink::new(SERIAL_PEER);
    let same_peer = MockLink::new(SERIAL_PEER);
    let other_peer = MockLink::new(BUS_PEER);
    let mut node: Node<'_, 4, 1, 4, 1> = Node::new(Config::new(LOCAL_NODE));

    node.attach_broadcast(&bus).unwrap();
    assert_eq!(
        node.attach_broadcast(&other_bus),
        Err(AttachError::Duplicate)
    );
    node.attach_serial(&link).unwrap();
    assert_eq!(node.attach_serial(&same_peer), Err(AttachError::Duplicate));
    assert_eq!(
        node.attach_serial(&other_peer),
        Err(AttachError::NoSlotLeft)
    );

    assert!(node.detach_broadcast().is_some());
    node.attach_broadcast(&other_bus).unwrap();
}

#[test]
fn test_response_routed_back_over_link() {
    let handler = |_request: &Transfer<'_>, reply: &mut Reply<'_>| {
        reply.send(&[0xaa]).unwrap();
    };
    let bus = MockTransport::new();
    let link = MockLink::new(SERIAL_PEER);
    let mut node: Node<'_> = Node::new(Config::new(LOCAL_NODE));
    node.attach_broadcast(&bus).unwrap();
    node.attach_serial(&link).unwrap();
    node.define_service(PORT, SERVICE, false, &handler).unwrap();

    let request = transfer(
        TransferKind::Request,
        430,
        Some(SERIAL_PEER),
        Some(LOCAL_NODE),
        9,
        hash(SERVICE),
        &[],
    );
    node.receive(&request).unwrap();

    assert_eq!(bus.sent_count(), 0);
    let (header, payload) = link.inner.take_single();
    assert_eq!(header.kind, TransferKind::Response);
    assert_eq!(header.transfer_id, TransferId::new(9));
    assert_eq!(payload, [0xaa]);
}

#[test]
fn test_payload_exceeding_capacity() {
    let continuation = |_outcome: ReplyOutcome<'_>| {};
    let failed = Cell::new(false);
    let handler = |_request: &Transfer<'_>, reply: &mut Reply<'_>| {
        failed.set(reply.send(&[0; 9]) == Err(SendError::PayloadTooLarge));
    };
    let bus = MockTransport::with_capacity(HEADER_LENGTH + 8);
    let mut node: Node<'_> = Node::new(Config::new(LOCAL_NODE));
    node.attach_broadcast(&bus).unwrap();
    node.define_service(PORT, SERVICE, false, &handler).unwrap();

    assert_eq!(
        node.request(
            START,
            BUS_PEER,
            PORT,
            hash(SERVICE),
            Priority::Nominal,
            &[0; 9],
            &continuation,
        ),
        Err(SendError::PayloadTooLarge)
    );
    assert_eq!(node.pending_requests(), 0);
    node.request(START, BUS_PEER, PORT, hash(SERVICE), Priority::Nominal, &[0; 8], &continuation)
        .unwrap();

    let request = transfer(
        TransferKind::Request,
        430,
        Some(BUS_PEER),
        Some(LOCAL_NODE),
        0,
        hash(SERVICE),
        &[],
    );
    node.receive(&request).unwrap();
    assert!(failed.get());
    assert_eq!(bus.sent_count(), 1);
    assert_eq!(node.port_stats(PORT).unwrap().errored, 1);
}

#[test]
fn test_route_selection() {
    let bus = MockTransport::new();
    let link = MockLink::new(SERIAL_PEER);
    let mut node: Node<'_> = Node::new(Config::new(LOCAL_NODE));
    assert_eq!(node.route(SERIAL_PEER), None);

    node.attach_serial(&link).unwrap();
    assert_eq!(node.route(SERIAL_PEER), Some(Route::Serial(SERIAL_PEER)));
    assert_eq!(node.route(BUS_PEER), None);

    node.attach_broadcast(&bus).unwrap();
    assert_eq!(node.route(SERIAL_PEER), Some(Route::Serial(SERIAL_PEER)));
    assert_eq!(node.route(BUS_PEER), Some(Route::Broadcast));

    node.detach_serial(SERIAL_PEER).unwrap();
    assert_eq!(node.route(SERIAL_PEER), Some(Route::Broadcast));
}
