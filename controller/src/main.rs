mod host;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
