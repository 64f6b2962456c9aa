//! VIN node binary entry point

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vin_node::server::run().await
}
