use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Something that can feed a child's standard input.
///
/// Implementations copy everything they have into `dest`. The engine closes
/// the child's input once `copy_to` returns.
#[async_trait]
pub trait InputSource: Send + Sync {
    async fn copy_to(&self, dest: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()>;

    /// Whether this source never produces data
    fn is_null(&self) -> bool {
        false
    }
}

/// Cloneable handle to the input source of a command
#[derive(Clone)]
pub struct PipeSource(Arc<dyn InputSource>);

impl PipeSource {
    pub fn new(source: impl InputSource + 'static) -> Self {
        PipeSource(Arc::new(source))
    }

    /// Source that produces nothing; the child sees end-of-input immediately
    pub fn null() -> Self {
        PipeSource::new(NullSource)
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        PipeSource::new(BytesSource(data.into()))
    }

    pub fn from_string(text: impl Into<String>) -> Self {
        PipeSource::from_bytes(text.into().into_bytes())
    }

    /// Single-use source backed by a reader. A second run using the same
    /// source fails with a pipe error.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        PipeSource::new(ReaderSource(Mutex::new(Some(Box::new(reader)))))
    }

    /// Source that opens `path` each time a run starts feeding input
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        PipeSource::new(FileSource(path.into()))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub async fn copy_to(&self, dest: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        self.0.copy_to(dest).await
    }
}

impl Default for PipeSource {
    fn default() -> Self {
        PipeSource::null()
    }
}

impl fmt::Debug for PipeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("PipeSource(null)")
        } else {
            f.write_str("PipeSource(..)")
        }
    }
}

impl From<&str> for PipeSource {
    fn from(text: &str) -> Self {
        PipeSource::from_string(text)
    }
}

impl From<String> for PipeSource {
    fn from(text: String) -> Self {
        PipeSource::from_string(text)
    }
}

impl From<Vec<u8>> for PipeSource {
    fn from(data: Vec<u8>) -> Self {
        PipeSource::from_bytes(data)
    }
}

struct NullSource;

#[async_trait]
impl InputSource for NullSource {
    async fn copy_to(&self, _dest: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        Ok(())
    }

    fn is_null(&self) -> bool {
        true
    }
}

struct BytesSource(Vec<u8>);

#[async_trait]
impl InputSource for BytesSource {
    async fn copy_to(&self, dest: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        dest.write_all(&self.0).await?;
        dest.flush().await?;
        Ok(())
    }
}

struct ReaderSource(Mutex<Option<Box<dyn AsyncRead + Send + Unpin>>>);

#[async_trait]
impl InputSource for ReaderSource {
    async fn copy_to(&self, dest: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        let mut reader = self
            .0
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("input reader was already consumed by an earlier run"))?;

        tokio::io::copy(&mut reader, dest).await?;
        dest.flush().await?;
        Ok(())
    }
}

struct FileSource(PathBuf);

#[async_trait]
impl InputSource for FileSource {
    async fn copy_to(&self, dest: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        let mut file = tokio::fs::File::open(&self.0)
            .await
            .with_context(|| format!("opening input file {}", self.0.display()))?;

        tokio::io::copy(&mut file, dest).await?;
        dest.flush().await?;
        Ok(())
    }
}
