use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};

use busrelay::broker::amqp::AmqpConnector;
use busrelay::broker::memory::MemoryBroker;
use busrelay::config::{Transport, load_config};
use busrelay::lifecycle::{Coordinator, termination_signal};
use busrelay::utils::{Error, Result, logging};

#[tokio::main]
async fn main() -> ExitCode {
    // a missing .env file is fine, real variables are used as they are
    let _ = dotenvy::dotenv();
    logging::init("info");
    info!("Starting AMQP publisher-subscriber relay");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let settings = load_config()?;
    let listener = TcpListener::bind(settings.server.addr())
        .await
        .map_err(Error::Ingress)?;

    match settings.transport {
        Transport::Amqp => {
            Coordinator::new(settings, AmqpConnector::default())
                .run(listener, termination_signal())
                .await
        }
        Transport::Memory => {
            let broker = MemoryBroker::new();
            broker.provision(&settings.broker);
            Coordinator::new(settings, broker)
                .run(listener, termination_signal())
                .await
        }
    }
}
