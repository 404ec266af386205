#[tokio::main]
async fn main() {
    if let Err(err) = termchat::run().await {
        eprintln!("termchat: {err:#}");
        std::process::exit(1);
    }
}
