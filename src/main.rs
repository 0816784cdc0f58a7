use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    ots_console_lib::run().await
}
