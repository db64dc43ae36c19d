use crate::prelude::*;

use rand::distributions::Alphanumeric;
use rand::distributions::DistString;
use std::env;
use std::path::PathBuf;

/// Create a fresh, uniquely named directory under the system temp dir to extract an archive into.
pub async fn create_scratch_folder() -> std::io::Result<PathBuf> {
    let folder_name = format!(
        "archive.{}.out",
        Alphanumeric.sample_string(&mut rand::thread_rng(), 10)
    );
    let folder_path = env::temp_dir().join(folder_name);
    tokio::fs::create_dir_all(&folder_path).await?;
    debug!("Created scratch folder: {}", folder_path.display());
    Ok(folder_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_scratch_folder() -> Result<()> {
        let first = create_scratch_folder().await?;
        let second = create_scratch_folder().await?;
        assert!(first.is_dir());
        assert_ne!(first, second);
        std::fs::remove_dir_all(first)?;
        std::fs::remove_dir_all(second)?;
        Ok(())
    }
}
