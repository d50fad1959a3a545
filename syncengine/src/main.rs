#[tokio::main]
async fn main() -> anyhow::Result<()> {
    syncengine::run_cli().await
}
