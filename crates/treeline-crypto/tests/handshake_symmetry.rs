//! End-to-end exercise of the handshake feeding the record layer.

use treeline_crypto::handshake::{HandshakeEngine, HandshakeOutcome, Role};
use treeline_crypto::keys::StaticKeypair;
use treeline_crypto::{CipherError, FrameCipher};

fn establish() -> (FrameCipher, FrameCipher) {
    let mut client = HandshakeEngine::new(Role::Initiator, StaticKeypair::generate());
    let mut server = HandshakeEngine::new(Role::Responder, StaticKeypair::generate());

    let hello = client.start().unwrap().unwrap();
    assert!(server.start().unwrap().is_none());

    let HandshakeOutcome::Reply(accept) = server.consume(&hello).unwrap() else {
        panic!("server must answer the hello");
    };
    let HandshakeOutcome::Established { reply: Some(finish), keys: client_keys } =
        client.consume(&accept).unwrap()
    else {
        panic!("client must establish on the accept message");
    };
    let HandshakeOutcome::Established { reply: None, keys: server_keys } =
        server.consume(&finish).unwrap()
    else {
        panic!("server must establish on the finish message");
    };

    (FrameCipher::new(*client_keys), FrameCipher::new(*server_keys))
}

#[test]
fn established_keys_carry_traffic_both_ways() {
    let (mut client, mut server) = establish();

    for i in 0..20u32 {
        let payload = format!("client frame {i}");
        let frame = client.seal(payload.as_bytes()).unwrap();
        assert_eq!(server.open(&frame).unwrap(), payload.as_bytes());
    }
    for i in 0..20u32 {
        let payload = format!("server frame {i}");
        let frame = server.seal(payload.as_bytes()).unwrap();
        assert_eq!(client.open(&frame).unwrap(), payload.as_bytes());
    }
}

#[test]
fn directions_are_not_interchangeable() {
    let (mut client, _server) = establish();
    // A frame sealed for the send direction must not open as received
    // traffic on the same side.
    let frame = client.seal(b"looped back").unwrap();
    assert!(client.open(&frame).is_err());
}

#[test]
fn sessions_do_not_cross() {
    let (mut client_a, _) = establish();
    let (_, mut server_b) = establish();
    let frame = client_a.seal(b"wrong session").unwrap();
    assert!(matches!(
        server_b.open(&frame),
        Err(CipherError::CounterDesync | CipherError::AuthenticationFailed)
    ));
}
