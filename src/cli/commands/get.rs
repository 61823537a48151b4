use crate::models::ModelStore;
use crate::storage::fs::dir_size;
use crate::Result;

/// 打印模型描述文件
pub async fn get(store: &ModelStore, tag: &str) -> Result<()> {
    let model = store.get(tag).await?;
    let size = dir_size(model.path()).await?;
    println!("# {} ({} bytes)", model, size);
    print!("{}", model.info().to_yaml()?);
    Ok(())
}
