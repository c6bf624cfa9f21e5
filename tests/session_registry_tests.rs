use std::collections::HashSet;

use battleship_server::session::{ConnectionHandle, SessionError};
use battleship_server::{
    ConnectionId, Coord, Fleet, GameConfig, GameSession, Orientation, SessionRegistry,
    SessionToken, ShipType, UserId,
};
use tokio::sync::mpsc;

fn handle(id: u64) -> ConnectionHandle {
    let (tx, _rx) = mpsc::channel(4);
    ConnectionHandle::new(ConnectionId(id), tx)
}

fn game() -> GameSession {
    GameSession::new(GameConfig::with_fleet(
        Fleet::new(vec![ShipType::new("Skiff", 1)]).unwrap(),
    ))
}

#[test]
fn user_ids_are_allocated_in_order_and_seats_run_out() {
    let mut game = game();
    let mut registry = SessionRegistry::new();
    let (a, _) = registry.register_new_player(&mut game, handle(1)).unwrap();
    let (b, _) = registry.register_new_player(&mut game, handle(2)).unwrap();
    assert_eq!((a, b), (UserId(1), UserId(2)));
    assert!(matches!(
        registry.register_new_player(&mut game, handle(3)),
        Err(SessionError::SessionFull)
    ));
    // A refused join does not burn a user id.
    assert_eq!(registry.next_user_id(), 3);
}

#[test]
fn tokens_are_unique_and_issued_once() {
    let mut seen = HashSet::new();
    for _ in 0..200 {
        let mut game = game();
        let mut registry = SessionRegistry::new();
        registry.register_new_player(&mut game, handle(1)).unwrap();
        registry.register_new_player(&mut game, handle(2)).unwrap();
        let t1 = registry.issue_token(UserId(1)).unwrap();
        let t2 = registry.issue_token(UserId(2)).unwrap();
        assert_ne!(t1, t2);
        assert!(seen.insert(t1));
        assert!(seen.insert(t2));
        assert!(matches!(
            registry.issue_token(UserId(1)),
            Err(SessionError::TokenAlreadyIssued(UserId(1)))
        ));
    }
}

#[test]
fn reconnect_requires_matching_token_and_a_dropped_seat() {
    let mut game = game();
    let mut registry = SessionRegistry::new();
    registry.register_new_player(&mut game, handle(1)).unwrap();
    registry.register_new_player(&mut game, handle(2)).unwrap();
    for user in [UserId(1), UserId(2)] {
        game.place_ship(user, Coord::new(0, 0), Orientation::Horizontal)
            .unwrap();
        game.finalize(user).unwrap();
    }
    let token = registry.issue_token(UserId(1)).unwrap();

    assert!(matches!(
        registry.reconnect(&mut game, UserId(1), token, handle(5)),
        Err(SessionError::InvalidCredentials)
    ));

    assert_eq!(registry.disconnect(ConnectionId(1)), Some(UserId(1)));
    game.mark_disconnected(UserId(1)).unwrap();
    let before = game.snapshot();

    let mut wrong = *token.as_bytes();
    wrong[7] = wrong[7].wrapping_add(1);
    assert!(matches!(
        registry.reconnect(&mut game, UserId(1), SessionToken::from_bytes(wrong), handle(6)),
        Err(SessionError::InvalidCredentials)
    ));
    assert!(matches!(
        registry.reconnect(&mut game, UserId(2), token, handle(6)),
        Err(SessionError::InvalidCredentials)
    ));

    registry
        .reconnect(&mut game, UserId(1), token, handle(7))
        .unwrap();
    assert_eq!(registry.user_for(ConnectionId(7)), Some(UserId(1)));
    assert_eq!(registry.user_for(ConnectionId(1)), None);

    // Only the reconnect event itself moves the version on.
    let after = game.snapshot();
    assert_eq!(after.version, before.version + 1);
    assert_eq!(
        bincode::serialize(&(&after.seats, after.turn, after.phase, after.strikes)).unwrap(),
        bincode::serialize(&(&before.seats, before.turn, before.phase, before.strikes)).unwrap()
    );
}

#[test]
fn token_text_form_parses_back() {
    let token = SessionToken::from_bytes([0x00, 0x1f, 0xa0, 0xff, 0x10, 0x02, 0x7e, 0x80]);
    let text = token.to_string();
    assert_eq!(text, "001fa0ff10027e80");
    assert_eq!(text.parse::<SessionToken>().unwrap(), token);
    assert!("001fa0ff10027e8".parse::<SessionToken>().is_err());
    assert!("zz1fa0ff10027e80".parse::<SessionToken>().is_err());
}

#[test]
fn restored_registry_keeps_tokens_but_no_connections() {
    let mut game = game();
    let mut registry = SessionRegistry::new();
    registry.register_new_player(&mut game, handle(1)).unwrap();
    let token = registry.issue_token(UserId(1)).unwrap();
    let restored = SessionRegistry::restore(registry.records(), registry.next_user_id());
    assert_eq!(restored.token(UserId(1)), Some(token));
    assert!(restored.connection(UserId(1)).is_none());
    assert_eq!(restored.next_user_id(), 2);
}
