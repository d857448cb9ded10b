use hoardproxy::ConnectionServer;
use tracing::info;

const DEFAULT_PORT: u16 = 8080;

fn parse_port(mut args: impl Iterator<Item = String>) -> u16 {
    args.nth(1)
        .and_then(|arg| arg.parse::<u16>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(DEFAULT_PORT)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let port = parse_port(std::env::args());
    info!(port, "starting hoardproxy");

    let server = ConnectionServer::bind(port).await?;
    server.run().await
}
