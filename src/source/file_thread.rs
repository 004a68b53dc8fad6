use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::StreamShared;

type Registry = Arc<Mutex<Vec<Arc<StreamShared>>>>;

/// Low-priority thread that keeps every live stream's ring topped up.
pub struct FileThread {
    streams: Registry,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FileThread {
    /// Starts the thread, waking every `update_ms`.
    pub fn spawn(update_ms: f32) -> std::io::Result<Self> {
        let streams: Registry = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));
        let period = Duration::from_secs_f32(update_ms.max(1.0) * 0.001);

        let handle = {
            let streams = streams.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("zirp-file".into())
                .spawn(move || {
                    tracing::debug!("file thread started");
                    while !shutdown.load(Ordering::Acquire) {
                        // snapshot so registration never waits on disk I/O
                        let live: Vec<_> = streams.lock().clone();
                        for stream in &live {
                            stream.file_update();
                        }
                        drop(live);
                        thread::park_timeout(period);
                    }
                    tracing::debug!("file thread stopped");
                })?
        };

        Ok(Self {
            streams,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn register(&self, stream: Arc<StreamShared>) {
        self.streams.lock().push(stream);
        self.wake();
    }

    pub fn unregister(&self, stream: &Arc<StreamShared>) {
        self.streams.lock().retain(|s| !Arc::ptr_eq(s, stream));
    }

    /// Runs an update pass now instead of at the next tick.
    pub fn wake(&self) {
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }
}

impl Drop for FileThread {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                tracing::error!("file thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{AudioFormat, SampleInfo};
    use crate::stream::MemoryStream;
    use std::time::Instant;

    #[test]
    fn inits_registered_streams() {
        let thread = FileThread::spawn(1.0).unwrap();
        let info = SampleInfo::pcm(AudioFormat::PcmI16, 1, 8000, Some(4));
        let shared = StreamShared::new(Box::new(MemoryStream::new(info, vec![0; 8])));
        thread.register(shared.clone());
        assert_eq!(thread.len(), 1);

        let start = Instant::now();
        while !shared.is_inited() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(shared.is_inited());
        thread.unregister(&shared);
        assert_eq!(thread.len(), 0);
    }
}
