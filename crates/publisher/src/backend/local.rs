use std::path::{Path, PathBuf};

use herald_common::{HeraldError, HeraldResult};

use crate::target::DEFAULT_OBJECT_KEY;

/// Write `html` to `{dir}/index.html`, creating `dir` if needed.
pub async fn write_local(html: &str, dir: &str) -> HeraldResult<PathBuf> {
    let output_path = Path::new(dir).join(DEFAULT_OBJECT_KEY);

    let result = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&output_path, html.as_bytes()).await
    }
    .await;

    result.map_err(|e| {
        HeraldError::Delivery(format!("Failed to write static page to {dir}: {e}"))
    })?;

    tracing::info!(path = %output_path.display(), "Static page written");
    Ok(output_path)
}
