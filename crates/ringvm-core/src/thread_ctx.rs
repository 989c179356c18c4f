//! Thread contexts group the streams driven by one worker.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::Device;
use crate::error::Result;
use crate::registry::StreamTypeRegistry;
use crate::role::StreamRole;
use crate::stream::Stream;

/// Streams driven by one logical thread of control.
///
/// Streams keep a weak back-reference to their thread context; the thread
/// context owns the streams.
#[derive(Debug)]
pub struct ThreadCtx {
    index: usize,
    registry: Arc<StreamTypeRegistry>,
    streams: RwLock<Vec<Arc<Stream>>>,
}

impl ThreadCtx {
    /// Create an empty thread context.
    pub fn new(index: usize, registry: Arc<StreamTypeRegistry>) -> Arc<Self> {
        Arc::new(Self {
            index,
            registry,
            streams: RwLock::new(Vec::new()),
        })
    }

    /// Position of this thread context in its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Registry used to resolve stream types.
    pub fn registry(&self) -> &StreamTypeRegistry {
        &self.registry
    }

    /// Create a stream and attach it to this thread context.
    pub fn add_stream(self: &Arc<Self>, device: Arc<Device>, role: StreamRole) -> Result<Arc<Stream>> {
        let stream = Arc::new(Stream::new(self, device, role)?);
        self.streams.write().push(Arc::clone(&stream));
        Ok(stream)
    }

    /// Streams attached to this thread context.
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams.read().clone()
    }

    /// Number of attached streams.
    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Drop every attached stream.
    pub fn clear(&self) {
        self.streams.write().clear();
    }
}
