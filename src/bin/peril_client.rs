//! Peril client: spawns and moves units, and fights wars through the bus.

use std::process::ExitCode;

use peril::bus::{AmqpConnection, Connection, Publisher};
use peril::config::BrokerConfig;
use peril::game::{self, lock_state, GameState};
use peril::repl;
use peril::routing::{self, GameLog, ARMY_MOVES_PREFIX, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peril=info,peril_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "client stopped");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    tracing::info!("Starting Peril client");
    let config = BrokerConfig::from_env()?;
    let connection = AmqpConnection::connect(&config.amqp_url)?;

    let Some(username) = repl::client_welcome()? else {
        return Ok(());
    };

    game::declare_topology(&connection, &config.dead_letter_exchange)?;
    let publisher = Publisher::open(&connection)?;
    let state = GameState::new(username.as_str()).shared();
    let _subscriptions = game::subscribe_client(
        &connection,
        &state,
        &publisher,
        &config.dead_letter_exchange,
        &config.subscribe_options(),
    )?;

    repl::print_client_help();
    while let Some(words) = repl::get_input()? {
        let Some(command) = words.first() else {
            continue;
        };
        match command.as_str() {
            "spawn" => match lock_state(&state).command_spawn(&words) {
                Ok(unit) => println!("Spawned a(n) {} in {} with id {}", unit.rank, unit.location, unit.id),
                Err(e) => println!("{}", e),
            },
            "move" => {
                let result = lock_state(&state).command_move(&words);
                match result {
                    Ok(army_move) => {
                        let key = routing::player_key(ARMY_MOVES_PREFIX, &username);
                        publisher.publish_json(EXCHANGE_PERIL_TOPIC, &key, &army_move)?;
                        println!(
                            "Moved {} unit(s) to {}",
                            army_move.units.len(),
                            army_move.to_location
                        );
                    }
                    Err(e) => println!("{}", e),
                }
            }
            "status" => print!("{}", lock_state(&state).command_status()),
            "spam" => match words.get(1).map(|n| n.parse::<usize>()) {
                Some(Ok(n)) => {
                    let key = routing::player_key(GAME_LOG_SLUG, &username);
                    for _ in 0..n {
                        let log = GameLog::now(username.as_str(), game::malicious_log());
                        publisher.publish_binary(EXCHANGE_PERIL_TOPIC, &key, &log)?;
                    }
                    println!("Published {} malicious log(s)", n);
                }
                _ => println!("usage: spam <n>"),
            },
            "help" => repl::print_client_help(),
            "quit" => break,
            other => println!("unknown command {:?}", other),
        }
    }

    tracing::info!("shutting down");
    connection.close()?;
    Ok(())
}
