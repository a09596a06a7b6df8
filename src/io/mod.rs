mod local;
mod progress;

pub use local::LocalFileReader;
pub use progress::{ProgressCallback, ProgressTracker, ProgressWriter};

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill the whole buffer starting at `offset`, failing on a short source.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(Error::InvalidArchive(format!(
                    "unexpected end of data at offset {}",
                    offset + filled as u64
                )));
            }
            filled += n;
        }
        Ok(())
    }
}

/// Run CPU-bound work off the async executor.
///
/// A panicking or cancelled task is reported as an I/O error against `path`.
pub(crate) async fn blocking<T, F>(path: &Path, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let path: PathBuf = path.to_path_buf();
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) => Err(Error::Io {
            path,
            source: io::Error::other(e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicking_work_becomes_an_error() {
        let result: Result<usize> = blocking(Path::new("image.png"), || panic!("encoder blew up")).await;
        assert!(matches!(result, Err(Error::Io { ref path, .. }) if path == Path::new("image.png")));
    }

    #[tokio::test]
    async fn work_result_is_passed_through() {
        assert_eq!(blocking(Path::new("x"), || Ok(7)).await.unwrap(), 7);
    }
}
