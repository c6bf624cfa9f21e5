use battleship_server::protocol::{JoinRequest, Message, Rejection};
use battleship_server::{
    Coord, Credentials, GameEvent, GamePhase, Orientation, SessionToken, ShotOutcome,
    UserId, VersionedEvent,
};
use proptest::prelude::*;

fn arb_coord() -> impl Strategy<Value = Coord> {
    (any::<u8>(), any::<u8>()).prop_map(|(r, c)| Coord::new(r, c))
}

fn arb_credentials() -> impl Strategy<Value = Credentials> {
    (any::<u64>(), any::<[u8; 8]>()).prop_map(|(u, t)| Credentials {
        user: UserId(u),
        token: SessionToken::from_bytes(t),
    })
}

fn arb_outcome() -> impl Strategy<Value = ShotOutcome> {
    prop_oneof![
        Just(ShotOutcome::Hit),
        Just(ShotOutcome::Miss),
        Just(ShotOutcome::AlreadyShot),
        "[A-Za-z]{1,12}".prop_map(ShotOutcome::Sunk),
    ]
}

/// Client and server messages that carry data worth mangling.
fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        any::<u16>().prop_map(|version| Message::Handshake { version }),
        any::<u16>().prop_map(|version| Message::Heartbeat { version }),
        arb_credentials().prop_map(|c| Message::Join(JoinRequest::Reconnect(c))),
        proptest::option::of(arb_credentials())
            .prop_map(|abandon| Message::Join(JoinRequest::New { abandon })),
        (arb_coord(), any::<bool>()).prop_map(|(coord, h)| Message::PlaceShip {
            coord,
            orientation: if h {
                Orientation::Horizontal
            } else {
                Orientation::Vertical
            },
        }),
        arb_coord().prop_map(|coord| Message::Fire { coord }),
        any::<bool>().prop_map(|accept| Message::RematchVote { accept }),
        arb_credentials().prop_map(Message::TokenIssued),
        (any::<u64>(), any::<u64>(), arb_coord(), arb_outcome()).prop_map(|(v, u, coord, outcome)| {
            Message::Event(VersionedEvent {
                version: v,
                event: GameEvent::ShotResult {
                    shooter: UserId(u),
                    coord,
                    outcome,
                },
            })
        }),
        Just(Message::Rejected(Rejection::InvalidState(GamePhase::AwaitingRematch))),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = bincode::deserialize::<Message>(&bytes);
    }

    #[test]
    fn flipped_byte_never_panics(msg in arb_message(), idx in any::<prop::sample::Index>(), flip in 1u8..=255) {
        let mut bytes = bincode::serialize(&msg).unwrap();
        let i = idx.index(bytes.len());
        bytes[i] ^= flip;
        if let Ok(decoded) = bincode::deserialize::<Message>(&bytes) {
            // A mutation that still decodes must produce a different message.
            prop_assert_ne!(decoded, msg);
        }
    }

    #[test]
    fn truncated_frames_are_rejected(msg in arb_message(), cut in any::<prop::sample::Index>()) {
        let bytes = bincode::serialize(&msg).unwrap();
        let len = cut.index(bytes.len());
        prop_assert!(bincode::deserialize::<Message>(&bytes[..len]).is_err());
    }
}

#[test]
fn rejections_read_as_plain_sentences() {
    assert_eq!(Rejection::NotYourTurn.to_string(), "it is not your turn");
    assert_eq!(Rejection::SessionFull.to_string(), "both seats are taken; join as a spectator instead");
}
