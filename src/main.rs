use clap::Parser;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = relpack::cli::Cli::parse();
    if let Err(err) = relpack::cli::run(cli).await {
        if err.is_user_actionable() {
            eprintln!("{err}");
        } else {
            log::error!("{err}");
        }
        std::process::exit(1);
    }
}
