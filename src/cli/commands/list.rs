use crate::models::ModelStore;
use crate::Result;

/// 列出仓库中的模型
pub async fn list(store: &ModelStore, name: Option<&str>) -> Result<()> {
    tracing::debug!("Listing models in {}", store.base_path().display());

    let models = store.list_items(name).await?;
    if models.is_empty() {
        println!("No models in {}", store.base_path().display());
        return Ok(());
    }

    println!("{:<40} {:<24} {:<26}", "TAG", "MODULE", "CREATED");
    for model in models {
        println!(
            "{:<40} {:<24} {:<26}",
            model.tag().to_string(),
            model.info().module,
            model.creation_time().format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}
