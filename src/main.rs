use tabletree_rs::cli;

#[tokio::main]
async fn main() {
    match cli::main().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
