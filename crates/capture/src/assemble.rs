use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{self, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::Result;

/// Concatenates the working directory's segment files, in filename order,
/// into `container_path` by raw byte copy, returning the files included.
///
/// The lexically-last segment is always left out: the newest file may still
/// be mid-write at the origin, and that caution is kept even after a clean
/// end of broadcast. Enumeration happens before the container is created,
/// so a container living inside the working directory never sweeps itself
/// into its own input set.
pub async fn assemble_container(
    working_dir: &Path,
    container_path: &Path,
) -> Result<Vec<PathBuf>> {
    let mut parts = segment_files(working_dir).await?;
    if parts.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no segment files to assemble in {}", working_dir.display()),
        )
        .into());
    }
    parts.pop();

    info!("container assembly started, {} files to merge", parts.len());

    let mut container = File::create(container_path).await?;
    for part in &parts {
        let mut segment = File::open(part).await?;
        io::copy(&mut segment, &mut container).await?;
        debug!("{} merged into the container", part.display());
    }
    container.flush().await?;

    info!("container assembly finished");
    Ok(parts)
}

async fn segment_files(working_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(working_dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "ts") && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
