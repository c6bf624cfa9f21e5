use std::path::PathBuf;

use battleship_server::{
    init_logging, render_rows, Bot, Client, GameEvent, HeartbeatTransport, JoinRequest, Message,
    Server, ServerConfig, SessionView, TcpTransport, DEFAULT_SESSION_ID,
};

use clap::Parser;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tokio::net::TcpListener;
use tokio::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
enum Commands {
    /// Host a game session that players and spectators connect to.
    Serve {
        #[arg(long, default_value = "0.0.0.0:5005")]
        bind: String,
        #[arg(long, default_value = DEFAULT_SESSION_ID)]
        session_id: String,
        #[arg(long, help = "Persist snapshots under this directory (default: memory only)")]
        state_dir: Option<PathBuf>,
        #[arg(long, help = "Seconds a disconnected player keeps their seat (default: forever)")]
        reconnect_grace_secs: Option<u64>,
        #[arg(long, help = "Seconds a player may take per shot; a second timeout forfeits")]
        turn_timeout_secs: Option<u64>,
        #[arg(long, help = "Seconds to answer the rematch poll before counting as a decline")]
        rematch_timeout_secs: Option<u64>,
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        heartbeat_secs: u64,
        #[arg(long, default_value_t = 45, value_parser = clap::value_parser!(u64).range(1..))]
        idle_secs: u64,
        #[arg(long, default_value_t = 256)]
        spectator_buffer: usize,
    },
    /// Follow a session as a spectator and print every event.
    Watch {
        #[arg(long, default_value = "127.0.0.1:5005")]
        connect: String,
    },
    /// Join as a player and let the computer play.
    Bot {
        #[arg(long, default_value = "127.0.0.1:5005")]
        connect: String,
        #[arg(long, help = "Fix RNG seed for reproducible games (e.g., --seed 12345)")]
        seed: Option<u64>,
        #[arg(long, help = "Leave after this many games")]
        games: Option<u32>,
        #[arg(long, help = "Decline rematches")]
        no_rematch: bool,
    },
}

fn print_view(view: &SessionView) {
    println!("phase: {} (version {})", view.phase, view.version);
    for seat in view.seats.iter().flatten() {
        println!(
            "{} {}{}{} - {} ship(s) afloat",
            seat.seat,
            seat.user,
            if seat.connected { "" } else { " [disconnected]" },
            if seat.ready { " [ready]" } else { "" },
            seat.ships_afloat
        );
        print!("{}", render_rows(&seat.grid));
    }
}

fn describe(event: &GameEvent) -> String {
    match event {
        GameEvent::PhaseChanged(phase) => format!("phase is now {}", phase),
        GameEvent::PlayerJoined { user, seat } => format!("{} took {}", user, seat),
        GameEvent::PlayerReady { user } => format!("{} finished placing ships", user),
        GameEvent::TurnNotice { user } => format!("{} to move", user),
        GameEvent::TurnSkipped { user } => format!("{} ran out of time", user),
        GameEvent::ShotResult {
            shooter,
            coord,
            outcome,
        } => format!("{} fired at {}: {}", shooter, coord, outcome),
        GameEvent::GameOver { winner } => format!("game over, {} wins", winner),
        GameEvent::RematchPrompt => "rematch? players vote, spectators may volunteer".to_string(),
        GameEvent::PlayerDisconnected { user } => format!("{} disconnected", user),
        GameEvent::PlayerReconnected { user } => format!("{} reconnected", user),
        GameEvent::PlayerLeft { user } => format!("{} left", user),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            session_id,
            state_dir,
            reconnect_grace_secs,
            turn_timeout_secs,
            rematch_timeout_secs,
            heartbeat_secs,
            idle_secs,
            spectator_buffer,
        } => {
            let config = ServerConfig {
                bind: bind.clone(),
                session_id,
                state_dir,
                reconnect_grace: reconnect_grace_secs.map(Duration::from_secs),
                turn_timeout: turn_timeout_secs.map(Duration::from_secs),
                rematch_timeout: rematch_timeout_secs.map(Duration::from_secs),
                heartbeat_interval: Duration::from_secs(heartbeat_secs),
                idle_timeout: Duration::from_secs(idle_secs),
                spectator_buffer,
                ..ServerConfig::default()
            };
            let server = Server::start(config).await?;
            let listener = TcpListener::bind(&bind).await?;
            tokio::select! {
                res = server.serve(listener) => res?,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("interrupted; saving state");
                }
            }
            server.shutdown().await?;
        }
        Commands::Watch { connect } => {
            let tcp = TcpTransport::connect(&connect).await?;
            let transport = HeartbeatTransport::new(tcp, ServerConfig::default().idle_timeout);
            let mut client = Client::connect(transport).await?;
            client.join(JoinRequest::Spectator).await?;
            loop {
                match client.next_message().await {
                    Ok(Message::Snapshot(view)) => print_view(&view),
                    Ok(Message::Event(event)) => {
                        println!("[{}] {}", event.version, describe(&event.event))
                    }
                    Ok(Message::Rejected(rejection)) => println!("refused: {}", rejection),
                    Ok(Message::ServerClosing) => {
                        println!("server is shutting down");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        println!("connection closed: {}", e);
                        break;
                    }
                }
            }
        }
        Commands::Bot {
            connect,
            seed,
            games,
            no_rematch,
        } => {
            if let Some(s) = seed {
                println!("Using fixed seed: {} (game will be reproducible)", s);
            }
            let rng = if let Some(s) = seed {
                SmallRng::seed_from_u64(s)
            } else {
                let mut seed_rng = rand::rng();
                SmallRng::from_rng(&mut seed_rng)
            };
            let tcp = TcpTransport::connect(&connect).await?;
            let transport = HeartbeatTransport::new(tcp, ServerConfig::default().idle_timeout);
            let mut client = Client::connect(transport).await?;
            let welcome = client.join(JoinRequest::New { abandon: None }).await?;
            println!("joined: {:?}", welcome);
            let mut bot = Bot::new(rng).with_rematch(!no_rematch);
            if let Some(games) = games {
                bot = bot.with_max_games(games);
            }
            let summary = bot.run(&mut client).await?;
            println!("played {} game(s), won {}", summary.games, summary.wins);
        }
    }
    Ok(())
}
