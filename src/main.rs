#[tokio::main(flavor = "current_thread")]
async fn main() {
    let res = migration_host::cli::run().await;
    if let Err(err) = res {
        migration_host::clean_logger();
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
