use battleship_server::{
    Coord, Fleet, GameConfig, GameError, GameEvent, GamePhase, GameSession, Orientation,
    Perspective, ShipType, UserId, BOARD_SIZE,
};
use proptest::prelude::*;

const A: UserId = UserId(1);
const B: UserId = UserId(2);

fn small_fleet() -> Fleet {
    Fleet::new(vec![ShipType::new("Destroyer", 2), ShipType::new("Skiff", 1)]).unwrap()
}

fn started() -> GameSession {
    let mut game = GameSession::new(GameConfig::with_fleet(small_fleet()));
    game.claim_seat(A).unwrap();
    game.claim_seat(B).unwrap();
    for user in [A, B] {
        game.place_ship(user, Coord::new(0, 0), Orientation::Horizontal)
            .unwrap();
        game.place_ship(user, Coord::new(5, 5), Orientation::Vertical)
            .unwrap();
        game.finalize(user).unwrap();
    }
    game.take_events();
    game
}

#[derive(Debug, Clone)]
enum Action {
    Fire(UserId, Coord),
    Place(UserId, Coord),
    Finalize(UserId),
}

fn action() -> impl Strategy<Value = Action> {
    let user = prop_oneof![Just(A), Just(B), Just(UserId(9))];
    let coord = (0..BOARD_SIZE + 1, 0..BOARD_SIZE).prop_map(|(r, c)| Coord::new(r, c));
    prop_oneof![
        6 => (user.clone(), coord.clone()).prop_map(|(u, c)| Action::Fire(u, c)),
        1 => (user.clone(), coord).prop_map(|(u, c)| Action::Place(u, c)),
        1 => user.prop_map(Action::Finalize),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn turns_alternate_and_refusals_change_nothing(actions in prop::collection::vec(action(), 1..120)) {
        let mut game = started();
        for action in actions {
            let before = game.snapshot();
            let mover = game.turn();
            let result = match action {
                Action::Fire(user, coord) => game.fire_at(user, coord).map(|_| ()),
                Action::Place(user, coord) => game
                    .place_ship(user, coord, Orientation::Horizontal)
                    .map(|_| ()),
                Action::Finalize(user) => game.finalize(user),
            };
            match result {
                Ok(()) => {
                    prop_assert_eq!(game.version(), before.version + game.take_events().len() as u64);
                    if game.phase() == GamePhase::InProgress {
                        let next = game.turn();
                        prop_assert!(next.is_some() && next != mover);
                    } else {
                        prop_assert_eq!(game.phase(), GamePhase::GameOver);
                        prop_assert_eq!(game.winner(), mover);
                    }
                }
                Err(_) => {
                    prop_assert_eq!(game.snapshot(), before);
                    prop_assert!(game.take_events().is_empty());
                }
            }
        }
    }
}

#[test]
fn full_game_to_victory() {
    let mut game = started();
    let targets = [Coord::new(0, 0), Coord::new(0, 1), Coord::new(5, 5)];
    let misses = [Coord::new(9, 0), Coord::new(9, 1), Coord::new(9, 2)];
    for (hit, miss) in targets.iter().zip(misses.iter()) {
        assert_eq!(game.turn(), Some(A));
        assert!(game.fire_at(A, *hit).unwrap().is_hit());
        if game.phase() == GamePhase::GameOver {
            break;
        }
        game.fire_at(B, *miss).unwrap();
    }
    assert_eq!(game.phase(), GamePhase::GameOver);
    assert_eq!(game.winner(), Some(A));
    assert_eq!(game.turn(), Some(B));
    let events = game.take_events();
    assert!(matches!(
        events.last().map(|e| &e.event),
        Some(GameEvent::GameOver { winner }) if *winner == A
    ));
    assert_eq!(game.fire_at(B, Coord::new(3, 3)), Err(GameError::InvalidState(GamePhase::GameOver)));
}

#[test]
fn snapshot_restores_byte_for_byte() {
    let mut game = started();
    game.fire_at(A, Coord::new(0, 0)).unwrap();
    game.fire_at(B, Coord::new(4, 4)).unwrap();
    let snapshot = game.snapshot();
    let restored = GameSession::restore(snapshot.clone());
    assert_eq!(
        bincode::serialize(&restored.snapshot()).unwrap(),
        bincode::serialize(&snapshot).unwrap()
    );
    // Restored players have to reconnect before they count as connected.
    let view = restored.view(Perspective::Spectator);
    assert!(view.seats.iter().flatten().all(|s| !s.connected));
}

#[test]
fn players_never_see_opponent_ships() {
    let game = started();
    let view = game.view(Perspective::Player(A));
    let theirs = view.seats[1].as_ref().unwrap();
    assert!(theirs.unplaced.is_empty());
    assert!(theirs
        .grid
        .iter()
        .flatten()
        .all(|c| *c == battleship_server::CellState::Empty));
    let mine = view.seats[0].as_ref().unwrap();
    assert!(mine
        .grid
        .iter()
        .flatten()
        .any(|c| *c == battleship_server::CellState::Ship));
}
