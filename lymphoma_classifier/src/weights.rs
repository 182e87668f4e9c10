use crate::{
    config::{ModelConfig, ModelSource},
    error::{ClassifierError, ClassifierResult},
};
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};

pub fn remote_file_url(endpoint: &str, repo_id: &str, revision: &str, filename: &str) -> String {
    format!(
        "{}/{}/resolve/{}/{}",
        endpoint.trim_end_matches('/'),
        repo_id,
        revision,
        filename
    )
}

/// Makes sure the encoder and checkpoint named by `config` exist under
/// `model_dir`, downloading missing files when the source is remote.
pub async fn ensure_local(config: &ModelConfig) -> ClassifierResult<()> {
    if let ModelSource::Remote {
        repo_id,
        revision,
        endpoint,
    } = &config.source
    {
        fs::create_dir_all(&config.model_dir).await.map_err(|e| {
            ClassifierError::WeightLoad(format!(
                "cannot create model directory {:?}: {}",
                config.model_dir, e
            ))
        })?;

        let client = reqwest::Client::new();
        for filename in [&config.encoder_file, &config.checkpoint_file] {
            let target = config.model_dir.join(filename);
            if fs::try_exists(&target).await.unwrap_or(false) {
                tracing::debug!("Using cached model file {:?}", target);
                continue;
            }
            let url = remote_file_url(endpoint, repo_id, revision, filename);
            download(&client, &url, &target).await?;
        }
    }

    config.validate()
}

/// Staging path for a download: the target name with `.part` appended.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn download(client: &reqwest::Client, url: &str, target: &Path) -> ClassifierResult<()> {
    tracing::info!("Downloading {} to {:?}", url, target);
    let partial = partial_path(target);

    match fetch_into(client, url, &partial).await {
        Ok(written) => {
            fs::rename(&partial, target)
                .await
                .map_err(|e| ClassifierError::Download {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            tracing::info!("Downloaded {} bytes to {:?}", written, target);
            Ok(())
        }
        Err(err) => {
            if let Err(e) = fs::remove_file(&partial).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial download {:?}: {}", partial, e);
                }
            }
            Err(err)
        }
    }
}

async fn fetch_into(client: &reqwest::Client, url: &str, partial: &Path) -> ClassifierResult<usize> {
    let download_error = |reason: String| ClassifierError::Download {
        url: url.to_string(),
        reason,
    };

    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| download_error(e.to_string()))?;

    let mut file = fs::File::create(partial)
        .await
        .map_err(|e| download_error(e.to_string()))?;

    let mut written = 0usize;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| download_error(e.to_string()))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| download_error(e.to_string()))?;
        written += chunk.len();
    }
    file.flush().await.map_err(|e| download_error(e.to_string()))?;

    Ok(written)
}
