use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::lines::{LineDecoder, TextEncoding};

/// Something that consumes a child's stdout or stderr.
///
/// A target is shared by every run of a command and holds no per-run state;
/// each run calls [`open`](Self::open) and writes to the sink it gets back.
pub trait OutputTarget: Send + Sync {
    fn open(&self) -> Box<dyn OutputSink>;

    /// Whether this target discards everything
    fn is_null(&self) -> bool {
        false
    }

    /// Members of a fan-out target, used to flatten nested merges
    fn merge_members(&self) -> Option<&[PipeTarget]> {
        None
    }
}

/// Per-run end of an [`OutputTarget`].
///
/// `write_chunk` is called for every chunk read from the pipe, in order.
/// `finish` is called once after the pipe reaches end-of-stream; a run torn
/// down early drops the sink without finishing it.
#[async_trait]
pub trait OutputSink: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Cloneable handle to an output target of a command
#[derive(Clone)]
pub struct PipeTarget(Arc<dyn OutputTarget>);

pub type AsyncLineHandler =
    Box<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

impl PipeTarget {
    pub fn new(target: impl OutputTarget + 'static) -> Self {
        PipeTarget(Arc::new(target))
    }

    pub fn null() -> Self {
        PipeTarget::new(NullTarget)
    }

    /// Appends every chunk to a shared in-memory buffer
    pub fn to_buffer(buffer: OutputBuffer) -> Self {
        PipeTarget::new(BufferTarget(buffer))
    }

    /// Writes and flushes every chunk to an async writer
    pub fn to_writer(writer: impl AsyncWrite + Send + Sync + Unpin + 'static) -> Self {
        PipeTarget::new(WriterTarget(Arc::new(Mutex::new(Box::new(writer)))))
    }

    pub fn to_stdout() -> Self {
        PipeTarget::to_writer(tokio::io::stdout())
    }

    pub fn to_stderr() -> Self {
        PipeTarget::to_writer(tokio::io::stderr())
    }

    /// Writes to `path`, creating or truncating it when a run's output starts
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        PipeTarget::new(FileTarget(path.into()))
    }

    /// Calls `handler` once per line of output
    pub fn to_delegate<F>(handler: F, encoding: TextEncoding) -> Self
    where
        F: Fn(String) -> Result<()> + Send + Sync + 'static,
    {
        PipeTarget::new(LineTarget {
            handler: Arc::new(LineHandler::Blocking(Box::new(handler))),
            encoding,
        })
    }

    /// Awaits `handler` once per line of output
    pub fn to_async_delegate<F, Fut>(handler: F, encoding: TextEncoding) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: AsyncLineHandler = Box::new(
            move |line| -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
                Box::pin(handler(line))
            },
        );
        PipeTarget::new(LineTarget {
            handler: Arc::new(LineHandler::Async(handler)),
            encoding,
        })
    }

    /// Fans every chunk out to all `targets` in the given order.
    ///
    /// Nested merges are flattened and null targets dropped.
    pub fn merge(targets: impl IntoIterator<Item = PipeTarget>) -> Self {
        let mut members = Vec::new();
        for target in targets {
            match target.0.merge_members() {
                Some(nested) => members.extend(nested.iter().cloned()),
                None => members.push(target),
            }
        }
        members.retain(|target| !target.is_null());

        match members.len() {
            0 => PipeTarget::null(),
            1 => members.remove(0),
            _ => PipeTarget::new(MergeTarget(members)),
        }
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Fresh sink for one run
    pub fn open(&self) -> Box<dyn OutputSink> {
        self.0.open()
    }
}

impl Default for PipeTarget {
    fn default() -> Self {
        PipeTarget::null()
    }
}

impl fmt::Debug for PipeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.merge_members() {
            Some(members) => f.debug_tuple("PipeTarget::merge").field(&members).finish(),
            None if self.is_null() => f.write_str("PipeTarget(null)"),
            None => f.write_str("PipeTarget(..)"),
        }
    }
}

impl From<OutputBuffer> for PipeTarget {
    fn from(buffer: OutputBuffer) -> Self {
        PipeTarget::to_buffer(buffer)
    }
}

/// Growable byte buffer shared between a target and the caller
#[derive(Clone, Default, Debug)]
pub struct OutputBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn extend(&self, chunk: &[u8]) {
        self.lock().extend_from_slice(chunk);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct NullTarget;

impl OutputTarget for NullTarget {
    fn open(&self) -> Box<dyn OutputSink> {
        Box::new(NullSink)
    }

    fn is_null(&self) -> bool {
        true
    }
}

struct NullSink;

#[async_trait]
impl OutputSink for NullSink {
    async fn write_chunk(&mut self, _chunk: &[u8]) -> Result<()> {
        Ok(())
    }
}

struct BufferTarget(OutputBuffer);

impl OutputTarget for BufferTarget {
    fn open(&self) -> Box<dyn OutputSink> {
        Box::new(BufferTarget(self.0.clone()))
    }
}

#[async_trait]
impl OutputSink for BufferTarget {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.0.extend(chunk);
        Ok(())
    }
}

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>>;

struct WriterTarget(SharedWriter);

impl OutputTarget for WriterTarget {
    fn open(&self) -> Box<dyn OutputSink> {
        Box::new(WriterTarget(self.0.clone()))
    }
}

#[async_trait]
impl OutputSink for WriterTarget {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let mut writer = self.0.lock().await;
        writer.write_all(chunk).await?;
        writer.flush().await?;
        Ok(())
    }
}

struct FileTarget(PathBuf);

impl OutputTarget for FileTarget {
    fn open(&self) -> Box<dyn OutputSink> {
        Box::new(FileSink {
            path: self.0.clone(),
            file: None,
        })
    }
}

struct FileSink {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl FileSink {
    async fn file(&mut self) -> Result<&mut tokio::fs::File> {
        if self.file.is_none() {
            let file = tokio::fs::File::create(&self.path)
                .await
                .with_context(|| format!("creating output file {}", self.path.display()))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .context("output file missing after creation")
    }
}

#[async_trait]
impl OutputSink for FileSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file().await?.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.file().await?.flush().await?;
        self.file = None;
        Ok(())
    }
}

enum LineHandler {
    Blocking(Box<dyn Fn(String) -> Result<()> + Send + Sync>),
    Async(AsyncLineHandler),
}

impl LineHandler {
    async fn call(&self, line: String) -> Result<()> {
        match self {
            LineHandler::Blocking(handler) => handler(line),
            LineHandler::Async(handler) => handler(line).await,
        }
    }
}

struct LineTarget {
    handler: Arc<LineHandler>,
    encoding: TextEncoding,
}

impl OutputTarget for LineTarget {
    fn open(&self) -> Box<dyn OutputSink> {
        Box::new(LineSink {
            buffer: BytesMut::new(),
            decoder: LineDecoder::new(self.encoding),
            handler: self.handler.clone(),
        })
    }
}

/// Splits one run's output into lines; a partial line dies with the sink
struct LineSink {
    buffer: BytesMut,
    decoder: LineDecoder,
    handler: Arc<LineHandler>,
}

#[async_trait]
impl OutputSink for LineSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        while let Some(line) = self.decoder.decode(&mut self.buffer)? {
            self.handler.call(line).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        while let Some(line) = self.decoder.decode_eof(&mut self.buffer)? {
            self.handler.call(line).await?;
        }
        Ok(())
    }
}

struct MergeTarget(Vec<PipeTarget>);

impl OutputTarget for MergeTarget {
    fn open(&self) -> Box<dyn OutputSink> {
        Box::new(MergeSink(self.0.iter().map(PipeTarget::open).collect()))
    }

    fn merge_members(&self) -> Option<&[PipeTarget]> {
        Some(&self.0)
    }
}

/// Delivers to every member before reporting the first failure
struct MergeSink(Vec<Box<dyn OutputSink>>);

#[async_trait]
impl OutputSink for MergeSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let mut first_error = None;
        for sink in &mut self.0 {
            if let Err(e) = sink.write_chunk(chunk).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn finish(&mut self) -> Result<()> {
        let mut first_error = None;
        for sink in &mut self.0 {
            if let Err(e) = sink.finish().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
