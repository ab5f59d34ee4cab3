#[macro_use]
extern crate tracing;

use tokio::net::TcpListener;
use tokio::signal;

use chat_database::settings::Settings;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    chat_server::init_tracing();

    let settings = Settings::get()?;
    let listener = TcpListener::bind(&settings.broker.address).await?;
    info!("Relay broker bound to {}", settings.broker.address);

    relay_protocol::broker::run(listener, signal::ctrl_c(), settings.broker.max_connections).await?;

    Ok(())
}
