// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use platform::mock::{MockPlatform, MockSession};

use super::errors::ErrorKind;
use super::*;

use core::str::FromStr;
use core::sync::atomic::Ordering;

extern crate std;

fn setup() -> (&'static MockPlatform, Network<MockPlatform>) {
    let platform = MockPlatform::new();
    (platform, Network::new(platform))
}

fn addr(s: &str) -> SocketAddr {
    SocketAddr::from_str(s).unwrap()
}

fn listening_socket(network: &Network<MockPlatform>, backlog: i32) -> (Handle, SocketAddr) {
    let h = network.socket().unwrap();
    network.bind(h, None).unwrap();
    network.listen(h, backlog).unwrap();
    network.set_nonblocking(h, true).unwrap();
    (h, network.local_address(h).unwrap())
}

#[test]
fn listen_accept_send_receive() {
    let (platform, network) = setup();
    let (listener, local) = listening_socket(&network, 1);
    assert_eq!(network.lifecycle(listener).unwrap(), Lifecycle::Listening);

    let remote = platform.remote_connect(&local).unwrap();
    let (child, _peer) = network.accept(listener).unwrap();
    assert_eq!(network.lifecycle(child).unwrap(), Lifecycle::Connected);

    assert_eq!(network.send(child, b"hello", SendFlags::empty()).unwrap(), 5);
    assert_eq!(remote.recv_all(), b"hello");

    remote.send(b"world").unwrap();
    let mut buf = [0u8; 16];
    let n = network
        .receive(child, &mut buf, ReceiveFlags::empty())
        .unwrap();
    assert_eq!(&buf[..n], b"world");

    assert_eq!(network.lifecycle(listener).unwrap(), Lifecycle::Listening);
}

#[test]
fn accept_returns_each_connection_exactly_once() {
    let (platform, network) = setup();
    let (listener, local) = listening_socket(&network, 4);

    let _remote = platform.remote_connect(&local).unwrap();
    let (child, peer) = network.accept(listener).unwrap();
    assert_eq!(network.peer_address(child).unwrap(), peer);

    let err = network.accept(listener).unwrap_err();
    assert!(matches!(err, AcceptError::NoConnectionsReady), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::WouldBlock);
}

#[test]
fn pending_connections_are_served_in_arrival_order() {
    let (platform, network) = setup();
    let (listener, local) = listening_socket(&network, 4);

    let a = platform.remote_connect(&local).unwrap();
    let b = platform.remote_connect(&local).unwrap();

    let (first, _) = network.accept(listener).unwrap();
    let (second, _) = network.accept(listener).unwrap();

    network.send(first, b"A", SendFlags::empty()).unwrap();
    network.send(second, b"B", SendFlags::empty()).unwrap();
    assert_eq!(a.recv_all(), b"A");
    assert_eq!(b.recv_all(), b"B");
}

#[test]
fn zero_backlog_nonblocking_accept_would_block() {
    let (_platform, network) = setup();
    let (listener, _) = listening_socket(&network, 0);
    let err = network.accept(listener).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WouldBlock);
    assert_eq!(network.lifecycle(listener).unwrap(), Lifecycle::Listening);
}

#[test]
fn zero_backlog_hands_over_arrivals_directly() {
    let (platform, network) = setup();
    let (listener, local) = listening_socket(&network, 0);
    let _remote = platform.remote_connect(&local).unwrap();
    let (child, _) = network.accept(listener).unwrap();
    assert_eq!(network.lifecycle(child).unwrap(), Lifecycle::Connected);
    assert_eq!(network.pending_connections(listener).unwrap(), 0);
}

#[test]
fn blocking_accept_times_out() {
    let (_platform, network) = setup();
    let (listener, _) = listening_socket(&network, 1);
    network.set_nonblocking(listener, false).unwrap();
    network
        .set_timeout(listener, Some(Duration::from_millis(5)))
        .unwrap();
    let err = network.accept(listener).unwrap_err();
    assert!(matches!(err, AcceptError::TimedOut), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(network.lifecycle(listener).unwrap(), Lifecycle::Listening);
}

#[test]
fn blocked_accept_reports_accepting_and_wakes_on_arrival() {
    let platform = MockPlatform::new();
    let network = std::sync::Arc::new(Network::new(platform));
    let (listener, local) = listening_socket(&network, 1);
    network.set_nonblocking(listener, false).unwrap();

    let waiter = {
        let network = network.clone();
        std::thread::spawn(move || network.accept(listener).map(|(h, _)| h))
    };
    while network.lifecycle(listener).unwrap() != Lifecycle::Accepting {
        core::hint::spin_loop();
    }
    let _remote = platform.remote_connect(&local).unwrap();
    let child = waiter.join().unwrap().unwrap();

    assert_eq!(network.lifecycle(child).unwrap(), Lifecycle::Connected);
    assert_eq!(network.lifecycle(listener).unwrap(), Lifecycle::Listening);
}

#[test]
fn manual_interaction_never_queues_beyond_backlog() {
    let (platform, mut network) = setup();
    network.set_platform_interaction(PlatformInteraction::Manual);
    let (listener, local) = listening_socket(&network, 2);

    let _remotes: std::vec::Vec<MockSession> = (0..3)
        .map(|_| platform.remote_connect(&local).unwrap())
        .collect();

    // Nothing is pulled in until asked to
    assert_eq!(network.pending_connections(listener).unwrap(), 0);
    assert_eq!(
        network.accept(listener).unwrap_err().kind(),
        ErrorKind::WouldBlock
    );

    assert_eq!(network.perform_platform_interaction().unwrap(), 2);
    assert_eq!(network.pending_connections(listener).unwrap(), 2);

    network.accept(listener).unwrap();
    assert_eq!(network.pending_connections(listener).unwrap(), 1);
    assert_eq!(network.perform_platform_interaction().unwrap(), 1);
    assert_eq!(network.pending_connections(listener).unwrap(), 2);
}

#[test]
fn closing_listener_discards_pending_connections() {
    let (platform, mut network) = setup();
    network.set_platform_interaction(PlatformInteraction::Manual);
    let (listener, local) = listening_socket(&network, 2);
    let remote = platform.remote_connect(&local).unwrap();
    network.perform_platform_interaction().unwrap();
    assert_eq!(network.live_sockets(), 2);

    network.close(listener).unwrap();
    assert_eq!(network.live_sockets(), 0);

    let mut buf = [0u8; 4];
    assert_eq!(remote.recv(&mut buf), Ok(0));
    assert_eq!(
        platform.remote_connect(&local).unwrap_err(),
        TransportError::ConnectionRefused
    );
}

#[test]
fn stale_handle_is_not_found() {
    let (platform, network) = setup();
    let remote_addr = addr("10.0.0.1:80");
    let _remote_listener = platform.remote_listen(remote_addr);
    let h = network.socket().unwrap();
    network.connect(h, Some(remote_addr)).unwrap();
    network.close(h).unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(network.close(h).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        network.bind(h, None).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(network.listen(h, 1).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        network.connect(h, Some(remote_addr)).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(network.accept(h).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        network
            .send(h, b"x", SendFlags::empty())
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        network
            .receive(h, &mut buf, ReceiveFlags::empty())
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(network.lifecycle(h), Err(HandleError::NotFound));
}

#[test]
fn failed_connect_rolls_back() {
    let (platform, network) = setup();
    platform.refuse_connections.store(true, Ordering::SeqCst);

    let closed = network.socket().unwrap();
    let err = network
        .connect(closed, Some(addr("10.0.0.1:80")))
        .unwrap_err();
    assert_eq!(
        err.kind(),
        ErrorKind::Transport(TransportError::ConnectionRefused)
    );
    assert_eq!(network.lifecycle(closed).unwrap(), Lifecycle::Closed);
    assert!(network.peer_address(closed).is_err());

    let bound = network.socket().unwrap();
    network.bind(bound, None).unwrap();
    network
        .connect(bound, Some(addr("10.0.0.1:80")))
        .unwrap_err();
    assert_eq!(network.lifecycle(bound).unwrap(), Lifecycle::Bound);
}

#[test]
fn connect_without_address_uses_default_peer() {
    let (platform, mut network) = setup();
    let h = network.socket().unwrap();
    assert!(matches!(
        network.connect(h, None),
        Err(ConnectError::NoDestination)
    ));

    let default_peer = addr("127.0.0.1:4444");
    network.set_default_peer(Some(default_peer));
    let remote_listener = platform.remote_listen(default_peer);
    let h = network.socket().unwrap();
    network.connect(h, None).unwrap();
    assert_eq!(network.peer_address(h).unwrap(), default_peer);
    assert!(remote_listener.accept().is_some());
}

#[test]
fn illegal_operations_are_invalid_state_without_side_effects() {
    let (platform, network) = setup();
    let remote_addr = addr("10.0.0.1:80");
    let _remote_listener = platform.remote_listen(remote_addr);
    let mut buf = [0u8; 4];

    let closed = network.socket().unwrap();
    network.set_nonblocking(closed, true).unwrap();
    let bound = network.socket().unwrap();
    network.bind(bound, None).unwrap();
    network.set_nonblocking(bound, true).unwrap();
    let (listening, _) = listening_socket(&network, 1);
    let connected = network.socket().unwrap();
    network.connect(connected, Some(remote_addr)).unwrap();
    network.set_nonblocking(connected, true).unwrap();

    let check = |h: Handle, expected: Lifecycle, kind: ErrorKind| {
        assert_eq!(kind, ErrorKind::InvalidState);
        assert_eq!(network.lifecycle(h).unwrap(), expected);
    };

    for h in [closed, bound] {
        let before = network.lifecycle(h).unwrap();
        check(h, before, network.accept(h).unwrap_err().kind());
        check(
            h,
            before,
            network.send(h, b"x", SendFlags::empty()).unwrap_err().kind(),
        );
        check(
            h,
            before,
            network
                .receive(h, &mut buf, ReceiveFlags::empty())
                .unwrap_err()
                .kind(),
        );
    }

    check(
        listening,
        Lifecycle::Listening,
        network.listen(listening, 1).unwrap_err().kind(),
    );
    check(
        listening,
        Lifecycle::Listening,
        network
            .connect(listening, Some(remote_addr))
            .unwrap_err()
            .kind(),
    );
    check(
        listening,
        Lifecycle::Listening,
        network
            .send(listening, b"x", SendFlags::empty())
            .unwrap_err()
            .kind(),
    );

    check(
        connected,
        Lifecycle::Connected,
        network.listen(connected, 1).unwrap_err().kind(),
    );
    check(
        connected,
        Lifecycle::Connected,
        network
            .connect(connected, Some(remote_addr))
            .unwrap_err()
            .kind(),
    );
    check(
        connected,
        Lifecycle::Connected,
        network.accept(connected).unwrap_err().kind(),
    );

    for h in [bound, listening, connected] {
        let before = network.lifecycle(h).unwrap();
        assert_eq!(
            network.bind(h, None).unwrap_err().kind(),
            ErrorKind::AlreadyBound
        );
        assert_eq!(network.lifecycle(h).unwrap(), before);
    }
}

#[test]
fn negative_backlog_is_rejected() {
    let (_platform, network) = setup();
    let h = network.socket().unwrap();
    network.bind(h, None).unwrap();
    let err = network.listen(h, -1).unwrap_err();
    assert!(matches!(err, ListenError::InvalidBacklog(-1)));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(network.lifecycle(h).unwrap(), Lifecycle::Bound);
}

#[test]
fn listen_without_bind_picks_an_ephemeral_address() {
    let (_platform, network) = setup();
    let h = network.socket().unwrap();
    assert!(matches!(
        network.local_address(h),
        Err(LocalAddrError::NotBound)
    ));
    network.listen(h, 1).unwrap();
    let local = network.local_address(h).unwrap();
    assert!(EPHEMERAL_PORTS.contains(&local.port()));
    assert!(local.ip().is_unspecified());
}

#[test]
fn listen_without_bind_uses_default_listen_address() {
    let (platform, mut network) = setup();
    let default_listen = addr("127.0.0.1:4444");
    network.set_default_listen_address(Some(default_listen));
    let h = network.socket().unwrap();
    network.listen(h, 1).unwrap();
    assert_eq!(network.local_address(h).unwrap(), default_listen);
    assert!(platform.remote_connect(&default_listen).is_ok());
}

#[test]
fn listen_rolls_back_when_transport_refuses() {
    let (platform, mut network) = setup();
    let taken = addr("127.0.0.1:4444");
    let _other = platform.remote_listen(taken);
    network.set_default_listen_address(Some(taken));

    let h = network.socket().unwrap();
    let err = network.listen(h, 1).unwrap_err();
    assert_eq!(
        err.kind(),
        ErrorKind::Transport(TransportError::AddressInUse)
    );
    assert_eq!(network.lifecycle(h).unwrap(), Lifecycle::Closed);
    // The implicit port reservation was returned
    network.bind(h, Some(taken)).unwrap();
}

#[test]
fn bind_conflicts_and_port_reuse_after_close() {
    let (_platform, network) = setup();
    let a = network.socket().unwrap();
    let b = network.socket().unwrap();
    network.bind(a, Some(addr("0.0.0.0:8080"))).unwrap();
    let err = network.bind(b, Some(addr("0.0.0.0:8080"))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AddressInUse);
    assert_eq!(network.lifecycle(b).unwrap(), Lifecycle::Closed);

    network.close(a).unwrap();
    network.bind(b, Some(addr("0.0.0.0:8080"))).unwrap();
}

#[test]
fn partial_writes_are_surfaced() {
    let (platform, network) = setup();
    let (listener, local) = listening_socket(&network, 1);
    let remote = platform.remote_connect(&local).unwrap();
    let (child, _) = network.accept(listener).unwrap();

    platform.write_limit.store(3, Ordering::SeqCst);
    assert_eq!(
        network.send(child, b"hello", SendFlags::empty()).unwrap(),
        3
    );
    assert_eq!(remote.recv_all(), b"hel");
    assert_eq!(network.lifecycle(child).unwrap(), Lifecycle::Connected);
}

#[test]
fn receive_observes_peer_close() {
    let (platform, network) = setup();
    let (listener, local) = listening_socket(&network, 1);
    let remote = platform.remote_connect(&local).unwrap();
    let (child, _) = network.accept(listener).unwrap();
    remote.send(b"bye").unwrap();
    drop(remote);

    let mut buf = [0u8; 8];
    assert_eq!(
        network
            .receive(child, &mut buf, ReceiveFlags::empty())
            .unwrap(),
        3
    );
    assert_eq!(
        network
            .receive(child, &mut buf, ReceiveFlags::empty())
            .unwrap(),
        0
    );
    assert_eq!(
        network
            .send(child, b"x", SendFlags::empty())
            .unwrap_err()
            .kind(),
        ErrorKind::Transport(TransportError::ConnectionReset)
    );
    assert_eq!(network.lifecycle(child).unwrap(), Lifecycle::Connected);
}

#[test]
fn nonblocking_io_would_block_only_when_nothing_moves() {
    let (platform, network) = setup();
    let (listener, local) = listening_socket(&network, 1);
    let _remote = platform.remote_connect(&local).unwrap();
    let (child, _) = network.accept(listener).unwrap();
    let mut buf = [0u8; 8];

    // Blocking socket, but the call asks not to wait
    assert_eq!(
        network
            .receive(child, &mut buf, ReceiveFlags::DONTWAIT)
            .unwrap_err()
            .kind(),
        ErrorKind::WouldBlock
    );

    network.set_nonblocking(child, true).unwrap();
    let big = [7u8; 5000];
    let sent = network.send(child, &big, SendFlags::empty()).unwrap();
    assert!(sent > 0 && sent < big.len());
    assert_eq!(
        network
            .send(child, &big[sent..], SendFlags::empty())
            .unwrap_err()
            .kind(),
        ErrorKind::WouldBlock
    );
}

#[test]
fn blocking_io_times_out() {
    let (platform, network) = setup();
    let (listener, local) = listening_socket(&network, 1);
    let _remote = platform.remote_connect(&local).unwrap();
    let (child, _) = network.accept(listener).unwrap();
    network
        .set_timeout(child, Some(Duration::from_millis(3)))
        .unwrap();

    let mut buf = [0u8; 8];
    let err = network
        .receive(child, &mut buf, ReceiveFlags::empty())
        .unwrap_err();
    assert!(matches!(err, ReceiveError::TimedOut), "{err:?}");
}

#[test]
fn default_options_apply_to_new_sockets() {
    let (_platform, mut network) = setup();
    let options = SocketOptions {
        nonblocking: true,
        timeout: Some(Duration::from_secs(1)),
    };
    network.set_default_options(options);
    let h = network.socket().unwrap();
    assert_eq!(network.options(h).unwrap(), options);
}

#[test]
fn queued_connections_are_unreachable_until_accepted() {
    let (platform, mut network) = setup();
    network.set_platform_interaction(PlatformInteraction::Manual);
    let (listener, local) = listening_socket(&network, 2);
    let _remotes: std::vec::Vec<MockSession> = (0..2)
        .map(|_| platform.remote_connect(&local).unwrap())
        .collect();
    assert_eq!(network.perform_platform_interaction().unwrap(), 2);

    let (first, _) = network.accept(listener).unwrap();
    let queued = Handle::from_raw(first.as_raw() + 1);
    assert!(matches!(network.close(queued), Err(CloseError::InvalidFd)));
    assert_eq!(network.lifecycle(queued), Err(HandleError::NotFound));
    assert!(matches!(
        network.send(queued, b"x", SendFlags::empty()),
        Err(SendError::InvalidFd)
    ));
    assert!(matches!(
        network.set_timeout(queued, None),
        Err(SetOptionError::InvalidFd)
    ));

    // The queued connection still holds its slot.
    let unrelated = network.socket().unwrap();
    assert_ne!(unrelated, queued);
    network.bind(unrelated, None).unwrap();

    let (second, _) = network.accept(listener).unwrap();
    assert_eq!(second, queued);
    assert_eq!(network.lifecycle(second).unwrap(), Lifecycle::Connected);

    network.close(listener).unwrap();
    assert_eq!(network.lifecycle(unrelated).unwrap(), Lifecycle::Bound);
    assert_eq!(network.lifecycle(first).unwrap(), Lifecycle::Connected);
    assert_eq!(network.lifecycle(second).unwrap(), Lifecycle::Connected);
    assert_eq!(network.live_sockets(), 3);
}

#[test]
fn waits_hand_the_cpu_back_to_the_platform() {
    let (platform, network) = setup();
    let (listener, local) = listening_socket(&network, 1);
    network.set_nonblocking(listener, false).unwrap();
    network
        .set_timeout(listener, Some(Duration::from_millis(500)))
        .unwrap();
    let err = network.accept(listener).unwrap_err();
    assert!(matches!(err, AcceptError::TimedOut), "{err:?}");
    let blocked = platform.blocked.load(Ordering::SeqCst);
    assert!(blocked > 0);

    let _remote = platform.remote_connect(&local).unwrap();
    let (child, _) = network.accept(listener).unwrap();
    network
        .set_timeout(child, Some(Duration::from_millis(500)))
        .unwrap();
    let mut buf = [0u8; 8];
    let err = network
        .receive(child, &mut buf, ReceiveFlags::empty())
        .unwrap_err();
    assert!(matches!(err, ReceiveError::TimedOut), "{err:?}");
    assert!(platform.blocked.load(Ordering::SeqCst) > blocked);
}
