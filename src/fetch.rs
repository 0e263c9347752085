use crate::{error::FetchError, router::InvocationContext};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::Path;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::instrument;

/// Streams the main object's file `key` into `dest`. Returns the number of
/// bytes written.
#[instrument(skip(ctx), fields(task_id = %ctx.task().id))]
pub async fn fetch_artifact(
    ctx: &InvocationContext,
    key: &str,
    dest: &Path,
    chunk_size: usize,
) -> Result<u64, FetchError> {
    let resp = ctx.load_main_file(key).await?;
    let written = write_to_file(resp.bytes_stream(), dest, chunk_size).await?;
    tracing::debug!("Fetched {} bytes into {:?}", written, dest);
    Ok(written)
}

/// Appends every chunk of `stream` to a freshly created file, writing at most
/// `chunk_size` bytes at a time. Fails if `path` already exists.
pub async fn write_to_file<S, E>(stream: S, path: &Path, chunk_size: usize) -> Result<u64, FetchError>
where
    S: Stream<Item = Result<Bytes, E>>,
    FetchError: From<E>,
{
    let write_err = |source| FetchError::Write {
        path: path.to_path_buf(),
        source,
    };
    let chunk_size = chunk_size.max(1);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(write_err)?;

    let mut stream = std::pin::pin!(stream);
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for piece in chunk.chunks(chunk_size) {
            file.write_all(piece).await.map_err(write_err)?;
            written += piece.len() as u64;
        }
    }
    file.flush().await.map_err(write_err)?;

    Ok(written)
}
