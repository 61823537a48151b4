use clap::Parser;
use modelforge::cli::{commands, Cli, Command};
use modelforge::config::Config;
use modelforge::models::ModelStore;
use modelforge::utils::logging::init_logging;
use modelforge::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 配置文件优先，其次环境变量
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(store) = cli.store {
        config.storage.base_path = store;
    }

    init_logging(&config.logging)?;

    let store = ModelStore::from_config(&config);
    store.ensure_base_path().await?;
    match cli.command {
        Command::List { name } => commands::list(&store, name.as_deref()).await?,
        Command::Get { tag } => commands::get(&store, &tag).await?,
        Command::Delete { tag } => commands::delete(&store, &tag).await?,
    }

    Ok(())
}
