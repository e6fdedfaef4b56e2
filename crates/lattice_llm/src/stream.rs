//! Pull-style streaming for chat responses.
//!
//! Some provider SDKs only offer callback-driven iteration. The adapter
//! here converts that to pull-style: a single producer task pushes
//! chunks into a bounded channel (capacity 1, so the producer is
//! backpressured to the consumer's pace) and the consumer pulls with
//! [`ChatStream::next`]. Dropping the stream closes the channel, which
//! the producer observes as a failed send.

use tokio::sync::mpsc;

use lattice_core::{Result, ToolCall};

/// One incremental assistant delta.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub delta: String,
    pub tool_calls: Vec<ToolCall>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Producer half handed to the SDK callback.
#[derive(Debug, Clone)]
pub struct StreamSender {
    tx: mpsc::Sender<Result<StreamChunk>>,
}

impl StreamSender {
    /// Push one chunk. Returns false once the consumer has dropped the
    /// stream, at which point the producer should stop.
    pub async fn send(&self, chunk: StreamChunk) -> bool {
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    /// Terminate the stream with an error.
    pub async fn fail(&self, err: lattice_core::Error) -> bool {
        self.tx.send(Err(err)).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Pull-style stream of assistant deltas. `next()` returning `None`
/// signals end of stream.
#[derive(Debug)]
pub struct ChatStream {
    rx: mpsc::Receiver<Result<StreamChunk>>,
}

impl ChatStream {
    /// Create a connected producer/consumer pair.
    pub fn push_adapter() -> (StreamSender, ChatStream) {
        let (tx, rx) = mpsc::channel(1);
        (StreamSender { tx }, ChatStream { rx })
    }

    /// Stream that yields `text` as a single chunk. Used by stubs and
    /// providers that do not support streaming natively.
    pub fn from_text(text: impl Into<String>) -> ChatStream {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 guarantees this send succeeds without a task.
        let _ = tx.try_send(Ok(StreamChunk::text(text)));
        ChatStream { rx }
    }

    /// Next chunk, or `None` at end of stream.
    pub async fn next(&mut self) -> Option<Result<StreamChunk>> {
        self.rx.recv().await
    }

    /// Drain the stream and concatenate all text deltas.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(chunk) = self.next().await {
            out.push_str(&chunk?.delta);
        }
        Ok(out)
    }
}
