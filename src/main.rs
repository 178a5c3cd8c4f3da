use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use caballus_driver::config::Config;
use caballus_driver::console::{self, Input};
use caballus_driver::engine::{Command, Engine};
use caballus_driver::error::{unexpected_error, Error};
use caballus_driver::external::HttpRideAPI;
use caballus_driver::realtime::transport::WebSocketConnector;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let api = Arc::new(HttpRideAPI::new(&config.api_base, &config.token));
    let connector = Arc::new(WebSocketConnector::new(&config.ws_url));

    let (engine, mut snapshots) = Engine::new(config, api, connector);
    let (command_tx, command_rx) = async_channel::unbounded();
    let (fix_tx, fix_rx) = async_channel::unbounded();

    let engine = tokio::spawn(engine.run(command_rx, fix_rx));

    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            println!("{}", console::render(&snapshots.borrow()));
        }
    });

    println!("{}", console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!("reading stdin failed: {}", err);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let sent = match console::parse_line(&line) {
            Ok(Input::Command(Command::Shutdown)) => break,
            Ok(Input::Command(command)) => command_tx.send(command).await.is_ok(),
            Ok(Input::Fix(fix)) => fix_tx.send(fix).await.is_ok(),
            Err(_) => {
                println!("{}", console::HELP);
                true
            }
        };

        if !sent {
            break;
        }
    }

    let _ = command_tx.send(Command::Shutdown).await;

    engine.await.map_err(|_| unexpected_error())?
}
