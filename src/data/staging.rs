use std::{
    io::{self, SeekFrom},
    path::Path,
};

use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt};

use crate::error::Error;

const STAGED_FILE_PREFIX: &str = "tubely-upload";

/// An upload copied to local disk so ffmpeg can read it by path.
///
/// The file is removed when this is dropped, so it never outlives the pipeline run that owns it,
/// whether the run succeeds, fails or panics.
pub struct StagedFile {
    temp_file: NamedTempFile,
    handle: tokio::fs::File,
    size: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        self.temp_file.path()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Handle positioned at the start of the staged bytes.
    pub fn reader(&mut self) -> &mut tokio::fs::File {
        &mut self.handle
    }
}

/// Copy the entire source into a new uniquely named file under `storage_root` and rewind it.
///
/// A failed or truncated copy removes the partial file before the error is returned.
pub async fn stage<R>(storage_root: &Path, suffix: &str, mut source: R) -> Result<StagedFile, Error>
where
    R: AsyncRead + Unpin,
{
    let temp_file = tempfile::Builder::new()
        .prefix(STAGED_FILE_PREFIX)
        .suffix(suffix)
        .tempfile_in(storage_root)
        .map_err(|e| {
            Error::StagingError(format!(
                "Failed to create staging file in {}: {e}",
                storage_root.display()
            ))
        })?;

    let std_file = temp_file
        .as_file()
        .try_clone()
        .map_err(|e| Error::StagingError(format!("Failed to open staging file: {e}")))?;
    let mut handle = tokio::fs::File::from_std(std_file);

    let size = tokio::io::copy(&mut source, &mut handle)
        .await
        .map_err(copy_error)?;
    handle
        .flush()
        .await
        .map_err(|e| Error::StagingError(format!("Failed to flush staging file: {e}")))?;
    handle
        .seek(SeekFrom::Start(0))
        .await
        .map_err(|e| Error::StagingError(format!("Failed to rewind staging file: {e}")))?;

    log::debug!(
        "Staged {size} bytes at {}",
        temp_file.path().display()
    );

    Ok(StagedFile {
        temp_file,
        handle,
        size,
    })
}

/// Errors raised by the request body reader travel through `io::Error`, unwrap them again so a
/// client error stays a client error.
fn copy_error(e: io::Error) -> Error {
    match e.get_ref().and_then(|inner| inner.downcast_ref::<Error>()) {
        Some(Error::UploadTooLargeError(limit)) => Error::UploadTooLargeError(*limit),
        Some(Error::InvalidMultipartError(msg)) => Error::InvalidMultipartError(msg.clone()),
        _ => Error::StagingError(format!("Failed to copy upload to staging file: {e}")),
    }
}
