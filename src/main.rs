#[tokio::main]
async fn main() {
    databackup::cli::main().await;
}
