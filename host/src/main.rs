use clap::Parser;
use host::config::HostConfig;
use host::network::Host;
use host::scene::HeadlessScene;
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = HostConfig::parse();
    info!("Starting host...");
    info!(
        "Size prefix order on the stream transport: {:?}",
        config.stream_order()
    );
    if let Some(addr) = config.headset_addr {
        info!("Reverse channel target: {}", addr);
    } else {
        info!(
            "Reverse channel target: first stream peer, port {}",
            config.headset_port
        );
    }

    let mut host = Host::bind(config, HeadlessScene::new()).await?;

    host.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    })
    .await;

    info!(
        "Host stopped with {} live objects and {} meshes",
        host.registry().len(),
        host.dispatcher().mesh_history().len()
    );
    Ok(())
}
