#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the negotiation policy.
//! Covers silence towards unauthenticated peers, slot exhaustion, replay and
//! duplicate handling, and wire-level rejection.

mod common;

use std::time::Duration;

use common::*;
use handshake_protocol::core::packet::{PacketType, MAX_PACKET_BYTES};
use handshake_protocol::core::token::ChallengeToken;
use handshake_protocol::protocol::ServerPeerState;
use handshake_protocol::{
    ClientState, DisconnectReason, Packet, PacketRegistry, ProtocolError, ServerEvent, Transition,
    WireContext,
};

// ============================================================================
// PRE-AUTHENTICATION SILENCE
// ============================================================================

#[test]
fn test_expired_token_produces_no_output() {
    let mut server = server(WireContext::secure(8));
    let authority = SealedAuthority::new(PRIVATE_KEY);
    let expired = authority.issue_connect_token(1, NOW.as_secs(), [1; 8]);

    let outcome = server.process_packet(client_addr(1), Packet::connection_request(expired), NOW);
    assert!(outcome.is_silent());
    assert_eq!(server.peer_state(client_addr(1)), ServerPeerState::Idle);
    assert_eq!(server.metrics().snapshot().expired_tokens, 1);
}

#[test]
fn test_forged_token_produces_no_output() {
    let mut server = server(WireContext::secure(8));
    let mut forged = valid_token(1);
    forged.data[100] ^= 0xFF;

    let outcome = server.process_packet(client_addr(1), Packet::connection_request(forged), NOW);
    assert!(outcome.is_silent());
    assert_eq!(server.metrics().snapshot().invalid_tokens, 1);
}

#[test]
fn test_token_sealed_with_other_key_rejected() {
    let mut server = server(WireContext::secure(8));
    let foreign =
        SealedAuthority::new([9u8; 32]).issue_connect_token(1, NOW.as_secs() + 30, [1; 8]);

    let outcome = server.process_packet(client_addr(1), Packet::connection_request(foreign), NOW);
    assert!(outcome.is_silent());
}

#[test]
fn test_challenge_mismatch_is_silent() {
    let mut server = server(WireContext::secure(8));
    let from = client_addr(1);
    server.process_packet(from, Packet::connection_request(valid_token(1)), NOW);

    let wrong = Packet::challenge_response(ChallengeToken::default());
    let outcome = server.process_packet(from, wrong, NOW);
    assert!(outcome.is_silent());
    assert_eq!(server.peer_state(from), ServerPeerState::AwaitingResponse);
    assert_eq!(server.metrics().snapshot().challenge_mismatches, 1);
}

#[test]
fn test_response_without_pending_challenge_is_silent() {
    let mut server = server(WireContext::secure(8));
    let outcome = server.process_packet(
        client_addr(1),
        Packet::challenge_response(ChallengeToken::default()),
        NOW,
    );
    assert!(outcome.is_silent());
    assert_eq!(server.connected_clients(), 0);
}

#[test]
fn test_challenge_from_other_address_rejected() {
    let mut server = server(WireContext::secure(8));
    let request = Packet::connection_request(valid_token(1));
    let outcome = server.process_packet(client_addr(1), request, NOW);
    let Packet::Challenge(challenge) = &outcome.outbound[0].packet else {
        panic!("expected challenge");
    };

    // a spoofer who sniffed the challenge cannot complete from elsewhere
    let stolen = Packet::challenge_response(challenge.token.clone());
    assert!(server.process_packet(client_addr(2), stolen, NOW).is_silent());
    assert_eq!(server.connected_clients(), 0);
}

// ============================================================================
// SLOT EXHAUSTION
// ============================================================================

#[test]
fn test_full_server_denies_once_and_keeps_no_state() {
    let mut server = server(WireContext::secure(1));
    let mut first = client(&server);
    first.connect(valid_token(1), NOW).unwrap();
    run_handshake(&mut server, &mut first, client_addr(1), NOW, 10);
    assert!(first.is_connected());

    let request = Packet::connection_request(valid_token(2));
    let outcome = server.process_packet(client_addr(2), request, NOW);
    assert_eq!(outcome.transition, Transition::Unchanged);
    assert_eq!(outcome.outbound.len(), 1);
    assert_eq!(outcome.outbound[0].packet, Packet::ConnectionDenied);
    assert_eq!(outcome.outbound[0].address, client_addr(2));
    assert_eq!(server.peer_state(client_addr(2)), ServerPeerState::Idle);
    assert_eq!(server.pending_connections(), 0);
}

#[test]
fn test_denied_client_reports_denial() {
    let mut server = server(WireContext::secure(1));
    let mut first = client(&server);
    first.connect(valid_token(1), NOW).unwrap();
    run_handshake(&mut server, &mut first, client_addr(1), NOW, 10);

    let mut second = client(&server);
    second.connect(valid_token(2), NOW).unwrap();
    run_handshake(&mut server, &mut second, client_addr(2), NOW, 10);
    assert_eq!(
        second.state(),
        ClientState::Disconnected(DisconnectReason::ConnectionDenied)
    );
}

#[test]
fn test_server_fills_between_challenge_and_response() {
    let mut server = server(WireContext::insecure(1));
    let from = client_addr(1);
    let challenge = server.process_packet(from, Packet::connection_request(valid_token(1)), NOW);
    let Packet::Challenge(challenge) = &challenge.outbound[0].packet else {
        panic!("expected challenge");
    };

    // an insecure client takes the only slot in the meantime
    server.process_packet(client_addr(2), Packet::insecure_connect(2, 5), NOW);

    let response = Packet::challenge_response(challenge.token.clone());
    let outcome = server.process_packet(from, response, NOW);
    assert_eq!(outcome.transition, Transition::Evicted);
    assert_eq!(outcome.outbound[0].packet, Packet::ConnectionDenied);
    assert_eq!(server.peer_state(from), ServerPeerState::Idle);
}

// ============================================================================
// DUPLICATES, REPLAYS AND DISCONNECTS
// ============================================================================

#[test]
fn test_duplicate_response_after_promotion_ignored() {
    let mut server = server(WireContext::secure(8));
    let from = client_addr(1);
    let challenge = server.process_packet(from, Packet::connection_request(valid_token(1)), NOW);
    let Packet::Challenge(challenge) = &challenge.outbound[0].packet else {
        panic!("expected challenge");
    };
    let response = Packet::challenge_response(challenge.token.clone());

    let promoted = server.process_packet(from, response.clone(), NOW);
    assert_eq!(promoted.transition, Transition::Advanced);
    assert_eq!(promoted.outbound.len(), 1);
    let Packet::KeepAlive(keep_alive) = &promoted.outbound[0].packet else {
        panic!("expected keep-alive");
    };
    assert!((0..8).contains(&keep_alive.client_index));

    assert!(server.process_packet(from, response, NOW).is_silent());
    assert_eq!(server.connected_clients(), 1);
}

#[test]
fn test_connected_address_request_ignored() {
    let mut server = server(WireContext::secure(8));
    let mut client = client(&server);
    client.connect(valid_token(1), NOW).unwrap();
    run_handshake(&mut server, &mut client, client_addr(1), NOW, 10);

    let request = Packet::connection_request(valid_token(1));
    let again = server.process_packet(client_addr(1), request, NOW);
    assert!(again.is_silent());
}

#[test]
fn test_connected_client_id_from_new_address_ignored() {
    let mut server = server(WireContext::secure(8));
    let mut client = client(&server);
    client.connect(valid_token(1), NOW).unwrap();
    run_handshake(&mut server, &mut client, client_addr(1), NOW, 10);

    let authority = SealedAuthority::new(PRIVATE_KEY);
    let second_token = authority.issue_connect_token(1, NOW.as_secs() + 30, [0xAB; 8]);
    let request = Packet::connection_request(second_token);
    let outcome = server.process_packet(client_addr(2), request, NOW);
    assert!(outcome.is_silent());
}

#[test]
fn test_retried_token_from_same_address_accepted() {
    let mut server = server(WireContext::secure(8));
    let from = client_addr(1);
    let token = valid_token(1);

    server.process_packet(from, Packet::connection_request(token.clone()), NOW);
    server.update(NOW + Duration::from_secs(6));
    assert_eq!(server.peer_state(from), ServerPeerState::Idle);

    // challenge expired, the same client may start over with the same token
    let later = NOW + Duration::from_secs(7);
    let outcome = server.process_packet(from, Packet::connection_request(token), later);
    assert_eq!(outcome.transition, Transition::Advanced);
}

#[test]
fn test_restarted_insecure_client_reconnects_from_same_address() {
    let mut server = server(WireContext::insecure(8));
    let from = client_addr(1);

    let mut first = client(&server);
    first.insecure_connect(42, NOW).unwrap();
    let now = run_handshake(&mut server, &mut first, from, NOW, 10);
    assert!(first.is_connected());
    assert_eq!(server.client_address(0), Some(from));
    server.pop_event();

    // same process address, fresh salt; the old session must not block it
    let mut second = client(&server);
    second.insecure_connect(42, now).unwrap();
    assert_ne!(second.client_salt(), first.client_salt());

    let mut now = now;
    for _ in 0..20 {
        now = run_handshake(&mut server, &mut second, from, now, 1);
        server.update(now);
    }
    assert!(second.is_connected(), "second client state = {:?}", second.state());
    assert_eq!(second.client_index(), Some(0));
    assert_eq!(server.connected_clients(), 1);
    assert_eq!(server.client_address(0), Some(from));
    assert!(matches!(
        server.pop_event(),
        Some(ServerEvent::ClientDisconnected {
            client_index: 0,
            reason: DisconnectReason::Superseded,
            ..
        })
    ));
    assert!(matches!(
        server.pop_event(),
        Some(ServerEvent::ClientConnected { client_index: 0, client_id: 42, .. })
    ));
}

#[test]
fn test_disconnect_is_idempotent() {
    let mut server = server(WireContext::secure(8));
    let mut client = client(&server);
    let from = client_addr(1);
    client.connect(valid_token(1), NOW).unwrap();
    run_handshake(&mut server, &mut client, from, NOW, 10);
    server.pop_event();

    let first = server.process_packet(from, Packet::Disconnect, NOW);
    assert_eq!(first.transition, Transition::Evicted);
    assert!(matches!(
        server.pop_event(),
        Some(ServerEvent::ClientDisconnected {
            reason: DisconnectReason::DisconnectedByClient,
            ..
        })
    ));

    let second = server.process_packet(from, Packet::Disconnect, NOW);
    assert!(second.is_silent());
    assert_eq!(server.pop_event(), None);
}

#[test]
fn test_disconnect_evicts_pending_challenge() {
    let mut server = server(WireContext::secure(8));
    let from = client_addr(1);
    server.process_packet(from, Packet::connection_request(valid_token(1)), NOW);

    let outcome = server.process_packet(from, Packet::Disconnect, NOW);
    assert_eq!(outcome.transition, Transition::Evicted);
    assert_eq!(server.peer_state(from), ServerPeerState::Idle);
}

#[test]
fn test_client_disconnect_frees_slot_immediately() {
    let mut server = server(WireContext::secure(1));
    let mut client = client(&server);
    let from = client_addr(1);
    client.connect(valid_token(1), NOW).unwrap();
    run_handshake(&mut server, &mut client, from, NOW, 10);
    assert!(server.is_full());

    let goodbye = client.disconnect().unwrap();
    let datagram = server.registry().encode(goodbye.packet).unwrap();
    server.process_datagram(from, &datagram, NOW);
    assert!(!server.is_full());
    assert!(client.disconnect().is_none());
}

#[test]
fn test_disconnect_all() {
    let mut server = server(WireContext::insecure(4));
    for port in 1..=3 {
        server.process_packet(client_addr(port), Packet::insecure_connect(u64::from(port), 0), NOW);
    }

    let goodbyes = server.disconnect_all();
    assert_eq!(goodbyes.len(), 3);
    assert!(goodbyes.iter().all(|o| o.packet == Packet::Disconnect));
    assert_eq!(server.connected_clients(), 0);
}

// ============================================================================
// WIRE LEVEL
// ============================================================================

#[test]
fn test_insecure_connect_unknown_in_secure_mode() {
    let mut server = server(WireContext::secure(8));
    let insecure = PacketRegistry::new(WireContext::insecure(8));
    let datagram = insecure.encode(Packet::insecure_connect(1, 2)).unwrap();

    match server.registry().decode(&datagram) {
        Err(ProtocolError::UnknownPacketType(tag)) => {
            assert_eq!(tag, PacketType::InsecureConnect.tag())
        }
        other => panic!("Unexpected result: {other:?}"),
    }

    let outcome = server.process_datagram(client_addr(1), &datagram, NOW);
    assert!(outcome.is_silent());
    assert_eq!(server.connected_clients(), 0);
    assert_eq!(server.metrics().snapshot().decode_failures, 1);
}

#[test]
fn test_keep_alive_index_out_of_range_dropped() {
    let writer = PacketRegistry::new(WireContext::secure(64));
    let reader = PacketRegistry::new(WireContext::secure(10));

    let datagram = writer.encode(Packet::keep_alive(10, 0)).unwrap();
    assert!(matches!(
        reader.decode(&datagram),
        Err(ProtocolError::ValueOutOfRange { .. })
    ));
    assert!(matches!(
        reader.encode(Packet::keep_alive(-1, 0)),
        Err(ProtocolError::ValueOutOfRange { .. })
    ));
}

#[test]
fn test_garbage_datagrams_dropped() {
    let mut server = server(WireContext::secure(8));
    for datagram in [&[][..], &[0xFF][..], &[0u8; 3][..], &vec![0u8; MAX_PACKET_BYTES + 1][..]] {
        assert!(server.process_datagram(client_addr(1), datagram, NOW).is_silent());
    }
    assert_eq!(server.metrics().snapshot().decode_failures, 4);
}

#[test]
fn test_anti_amplification_for_every_context() {
    for max_clients in [1u32, 2, 64, 255, 256] {
        for context in [WireContext::secure(max_clients), WireContext::insecure(max_clients)] {
            let registry = PacketRegistry::new(context);
            let request = registry.max_packet_bytes(PacketType::ConnectionRequest);
            assert!(registry.max_packet_bytes(PacketType::ConnectionDenied) < request);
            assert!(registry.max_packet_bytes(PacketType::Challenge) < request);
            assert!(registry.max_packet_bytes(PacketType::KeepAlive) < request);
        }
    }
}
