use minirpc::{
    config::Config, dispatcher::Dispatcher, logging, methods::builtin_registry, server::Server,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let dispatcher = Dispatcher::new(builtin_registry()?);
    let server = Server::bind(&config, dispatcher).await?;

    info!(
        transport = %config.transport,
        local_addr = %server.local_addr(),
        max_request_bytes = config.max_request_bytes,
        "server starting"
    );

    let handle = server.start()?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    handle.stop().await?;
    Ok(())
}
