//! Peril server: pauses and resumes the game, and records game logs.

use std::process::ExitCode;

use peril::bus::{AmqpConnection, Connection, Publisher};
use peril::config::BrokerConfig;
use peril::game::{self, GameLogWriter};
use peril::repl;
use peril::routing::{PlayingState, EXCHANGE_PERIL_DIRECT, PAUSE_KEY};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peril=info,peril_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server stopped");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    tracing::info!("Starting Peril server");
    let config = BrokerConfig::from_env()?;
    let connection = AmqpConnection::connect(&config.amqp_url)?;

    game::declare_topology(&connection, &config.dead_letter_exchange)?;
    let publisher = Publisher::open(&connection)?;
    let _logs = game::subscribe_server(
        &connection,
        GameLogWriter::new(&config.game_log_path),
        &config.dead_letter_exchange,
        &config.subscribe_options(),
    )?;

    repl::print_server_help();
    while let Some(words) = repl::get_input()? {
        let Some(command) = words.first() else {
            continue;
        };
        match command.as_str() {
            "pause" => {
                tracing::info!("sending pause message");
                publisher.publish_json(
                    EXCHANGE_PERIL_DIRECT,
                    PAUSE_KEY,
                    &PlayingState { is_paused: true },
                )?;
            }
            "resume" => {
                tracing::info!("sending resume message");
                publisher.publish_json(
                    EXCHANGE_PERIL_DIRECT,
                    PAUSE_KEY,
                    &PlayingState { is_paused: false },
                )?;
            }
            "help" => repl::print_server_help(),
            "quit" => break,
            other => println!("unknown command {:?}", other),
        }
    }

    tracing::info!("shutting down");
    connection.close()?;
    Ok(())
}
