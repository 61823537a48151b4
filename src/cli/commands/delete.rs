use crate::models::ModelStore;
use crate::Result;

/// 删除模型
pub async fn delete(store: &ModelStore, tag: &str) -> Result<()> {
    let resolved = store.resolve(tag).await?;
    store.delete(&resolved).await?;
    println!("Deleted {}", resolved);
    Ok(())
}
