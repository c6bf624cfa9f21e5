use std::sync::Arc;

use battleship_server::{
    Bot, Client, ClientState, ConfigError, Coord, Fleet, GameConfig, GameEvent, GamePhase, HeartbeatTransport,
    InMemoryTransport, JoinRequest, Message, Orientation, Perspective, Rejection, Server,
    ServerConfig, ShipType, ShotOutcome, UserId, Welcome,
};
use battleship_server::{FileStore, MemoryStore, SnapshotStore};
use rand::{rngs::SmallRng, SeedableRng};
use tokio::time::{timeout, Duration};

const STEP: Duration = Duration::from_secs(5);

fn skiff_config() -> ServerConfig {
    ServerConfig {
        game: GameConfig::with_fleet(Fleet::new(vec![ShipType::new("Skiff", 1)]).unwrap()),
        ..ServerConfig::default()
    }
}

async fn connect(server: &Server) -> anyhow::Result<Client<InMemoryTransport>> {
    Client::connect(server.connect_in_memory()).await
}

/// Two seated players with one skiff each (A at A1, B at J10), both locked in.
async fn seated_pair(
    server: &Server,
) -> anyhow::Result<(Client<InMemoryTransport>, Client<InMemoryTransport>)> {
    let mut a = connect(server).await?;
    let mut b = connect(server).await?;
    a.join(JoinRequest::New { abandon: None }).await?;
    b.join(JoinRequest::New { abandon: None }).await?;
    a.wait_for(|s| s == ClientState::Placing).await?;
    a.place_ship(Coord::new(0, 0), Orientation::Horizontal).await?;
    b.place_ship(Coord::new(9, 9), Orientation::Horizontal).await?;
    a.finalize().await?;
    b.finalize().await?;
    timeout(STEP, a.wait_for(|s| s == ClientState::MyTurn)).await??;
    timeout(STEP, b.wait_for(|s| s == ClientState::OpponentTurn)).await??;
    Ok((a, b))
}

#[tokio::test(flavor = "multi_thread")]
async fn bots_play_a_full_game_while_a_spectator_watches() -> anyhow::Result<()> {
    let server = Server::start(ServerConfig::default()).await?;

    let mut watcher = connect(&server).await?;
    watcher.join(JoinRequest::Spectator).await?;

    let mut handles = Vec::new();
    for seed in [1u64, 2] {
        let mut client = connect(&server).await?;
        client.join(JoinRequest::New { abandon: None }).await?;
        handles.push(tokio::spawn(async move {
            let mut bot = Bot::new(SmallRng::seed_from_u64(seed)).with_max_games(1);
            bot.run(&mut client).await
        }));
    }

    let mut last_version = 0;
    let mut shots = 0;
    let winner = timeout(Duration::from_secs(30), async {
        loop {
            let event = watcher.next_event().await?;
            assert!(event.version >= last_version);
            last_version = event.version;
            match event.event {
                GameEvent::ShotResult { .. } => shots += 1,
                GameEvent::GameOver { winner } => return anyhow::Ok(winner),
                _ => {}
            }
        }
    })
    .await??;

    let mut wins = 0;
    for handle in handles {
        let summary = timeout(STEP, handle).await???;
        assert_eq!(summary.games, 1);
        wins += summary.wins;
    }
    assert_eq!(wins, 1);
    assert!([UserId(1), UserId(2)].contains(&winner));
    // Every ship cell of the loser was hit, so at least 17 shots landed.
    assert!(shots >= 17);
    server.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_join_leaves_the_connection_usable() -> anyhow::Result<()> {
    let server = Server::start(skiff_config()).await?;
    let (_a, _b) = seated_pair(&server).await?;

    let mut late = connect(&server).await?;
    let err = late
        .join(JoinRequest::New { abandon: None })
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<Rejection>(), Some(&Rejection::SessionFull));

    let welcome = late.join(JoinRequest::Spectator).await?;
    assert!(matches!(welcome, Welcome::Spectator { .. }));
    match timeout(STEP, late.next_message()).await?? {
        Message::Snapshot(view) => assert_eq!(view.phase, GamePhase::InProgress),
        other => panic!("expected a snapshot, got {:?}", other),
    }
    server.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn actions_before_join_are_refused() -> anyhow::Result<()> {
    let server = Server::start(skiff_config()).await?;
    let mut client = connect(&server).await?;
    client.send(Message::Fire { coord: Coord::new(0, 0) }).await?;
    assert_eq!(
        timeout(STEP, client.next_message()).await??,
        Message::Rejected(Rejection::NotJoined)
    );
    server.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn shots_resolve_and_the_winner_is_announced() -> anyhow::Result<()> {
    let server = Server::start(skiff_config()).await?;
    let (mut a, mut b) = seated_pair(&server).await?;

    assert_eq!(a.fire(Coord::new(5, 5)).await?, ShotOutcome::Miss);
    assert_eq!(a.state(), ClientState::OpponentTurn);

    let err = a.fire(Coord::new(6, 6)).await.unwrap_err();
    assert_eq!(err.downcast_ref::<Rejection>(), Some(&Rejection::NotYourTurn));

    timeout(STEP, b.wait_for(|s| s == ClientState::MyTurn)).await??;
    assert_eq!(b.fire(Coord::new(0, 0)).await?, ShotOutcome::Sunk("Skiff".into()));
    assert_eq!(b.session().winner(), Some(UserId(2)));
    timeout(STEP, a.wait_for(|s| s == ClientState::RematchPending)).await??;
    assert_eq!(a.session().winner(), Some(UserId(2)));
    server.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_player_reconnects_with_its_token() -> anyhow::Result<()> {
    let server = Server::start(skiff_config()).await?;
    let (a, mut b) = seated_pair(&server).await?;
    let creds = a.session().credentials().expect("token after finalize");
    drop(a);

    let event = timeout(STEP, b.next_event()).await??;
    assert_eq!(event.event, GameEvent::PlayerDisconnected { user: UserId(1) });

    let mut back = connect(&server).await?;
    assert_eq!(
        back.join(JoinRequest::Reconnect(creds)).await?,
        Welcome::Reconnected {
            user: UserId(1),
            seat: battleship_server::Seat::One
        }
    );
    timeout(STEP, back.wait_for(|s| s == ClientState::MyTurn)).await??;
    assert_eq!(back.fire(Coord::new(9, 9)).await?, ShotOutcome::Sunk("Skiff".into()));
    server.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn restarted_server_resumes_from_its_snapshot() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store: Arc<dyn SnapshotStore> = Arc::new(FileStore::new(dir.path()));

    let server = Server::with_store(skiff_config(), store.clone()).await?;
    let (mut a, b) = seated_pair(&server).await?;
    a.fire(Coord::new(4, 4)).await?;
    let creds_a = a.session().credentials().unwrap();
    let creds_b = b.session().credentials().unwrap();
    let before = server.lobby().view(Perspective::Spectator).await?;
    server.shutdown().await?;
    drop((a, b));

    assert!(dir.path().join("default.bin").exists());

    let server = Server::with_store(skiff_config(), store).await?;
    let restored = server.lobby().view(Perspective::Spectator).await?;
    assert_eq!(restored.phase, GamePhase::InProgress);
    assert_eq!(restored.version, before.version);
    assert_eq!(restored.turn, Some(UserId(2)));
    assert!(restored.seats.iter().flatten().all(|s| !s.connected));
    for (old, new) in before.seats.iter().zip(restored.seats.iter()) {
        assert_eq!(old.as_ref().map(|s| &s.grid), new.as_ref().map(|s| &s.grid));
    }

    let mut b = connect(&server).await?;
    b.join(JoinRequest::Reconnect(creds_b)).await?;
    let mut a = connect(&server).await?;
    a.join(JoinRequest::Reconnect(creds_a)).await?;
    timeout(STEP, b.wait_for(|s| s == ClientState::MyTurn)).await??;
    assert_eq!(b.fire(Coord::new(0, 0)).await?, ShotOutcome::Sunk("Skiff".into()));
    server.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn players_without_a_token_do_not_survive_a_restart() -> anyhow::Result<()> {
    let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
    let server = Server::with_store(skiff_config(), store.clone()).await?;
    let mut a = connect(&server).await?;
    let mut b = connect(&server).await?;
    a.join(JoinRequest::New { abandon: None }).await?;
    b.join(JoinRequest::New { abandon: None }).await?;
    a.place_ship(Coord::new(0, 0), Orientation::Horizontal).await?;
    let creds = a.finalize().await?;
    server.shutdown().await?;

    let server = Server::with_store(skiff_config(), store).await?;
    let view = server.lobby().view(Perspective::Spectator).await?;
    assert_eq!(view.phase, GamePhase::WaitingForPlayers);
    assert_eq!(view.seats[0].as_ref().map(|s| s.user), Some(UserId(1)));
    assert!(view.seats[1].is_none());

    let mut back = connect(&server).await?;
    back.join(JoinRequest::Reconnect(creds)).await?;
    let mut fresh = connect(&server).await?;
    assert_eq!(
        fresh.join(JoinRequest::New { abandon: None }).await?,
        Welcome::Player {
            user: UserId(3),
            seat: battleship_server::Seat::Two
        }
    );
    server.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn server_heartbeats_keep_a_responsive_client_alive() -> anyhow::Result<()> {
    let config = ServerConfig {
        heartbeat_interval: Duration::from_millis(50),
        idle_timeout: Duration::from_millis(300),
        ..skiff_config()
    };
    let server = Server::start(config).await?;

    let transport = HeartbeatTransport::new(server.connect_in_memory(), Duration::from_secs(2));
    let mut live = Client::connect(transport).await?;
    let mut silent = connect(&server).await?;

    // Nothing but heartbeats arrives, and the wrapper answers each of them.
    let quiet = timeout(Duration::from_millis(800), live.next_message()).await;
    assert!(quiet.is_err());

    // The silent client never answered a heartbeat and was cut off.
    let closed = timeout(STEP, async {
        loop {
            if silent.next_message().await.is_err() {
                return;
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    let welcome = timeout(STEP, live.join(JoinRequest::New { abandon: None })).await??;
    assert!(matches!(welcome, Welcome::Player { .. }));
    server.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn unusable_timings_are_refused_at_startup() -> anyhow::Result<()> {
    let config = ServerConfig {
        heartbeat_interval: Duration::ZERO,
        ..skiff_config()
    };
    let err = match Server::start(config).await {
        Ok(_) => panic!("a zero heartbeat interval was accepted"),
        Err(e) => e,
    };
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::ZeroDuration("heartbeat interval"))
    );

    let config = ServerConfig {
        idle_timeout: Duration::ZERO,
        ..skiff_config()
    };
    assert!(Server::start(config).await.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn clients_are_told_before_the_server_stops() -> anyhow::Result<()> {
    let server = Server::start(skiff_config()).await?;
    let mut player = connect(&server).await?;
    player.join(JoinRequest::New { abandon: None }).await?;
    let mut watcher = connect(&server).await?;
    watcher.join(JoinRequest::Spectator).await?;
    server.shutdown().await?;

    for client in [&mut player, &mut watcher] {
        let notice = timeout(STEP, async {
            loop {
                match client.next_message().await {
                    Ok(Message::ServerClosing) => return true,
                    Ok(_) => continue,
                    Err(_) => return false,
                }
            }
        })
        .await?;
        assert!(notice);
        assert_eq!(client.state(), ClientState::Closed);
    }
    Ok(())
}
