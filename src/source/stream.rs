use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use delegate::delegate;
use parking_lot::{Mutex, MutexGuard};

use super::{frame_to_block, AudioSource};
use crate::decoder::SampleInfo;
use crate::stream::AudioStream;

/// Ring and loop state, shared by the render thread, file thread and API.
struct StreamState {
    /// Allocated on the API thread once the format is known.
    ring: Option<VecDeque<u8>>,
    ring_size: usize,
    primed: bool,
    reset: bool,
    warned: bool,
    /// Playback position; differs from the stream position by what's buffered.
    play_block: u32,
    next_block: Option<u32>,
    num_blocks: Option<u32>,
    stream_pos: u32,
    loop_count: i32,
    loop_count_set: bool,
    read_loop_current: i32,
    play_loop_current: i32,
    read_done: bool,
    play_done: bool,
    loop_start: u32,
    loop_end: Option<u32>,
    loop_set: bool,
    release_loop: bool,
}

impl StreamState {
    fn stored(&self) -> usize {
        self.ring.as_ref().map_or(0, VecDeque::len)
    }

    /// The loop window in blocks. The reader and the player must agree on it.
    fn loop_blocks(&self, block_frames: u16) -> (u32, Option<u32>) {
        let start = frame_to_block(self.loop_start, block_frames);
        let end = self
            .loop_end
            .map(|e| frame_to_block(e, block_frames).max(start + 1));
        (start, end)
    }
}

/// Only ever locked by the file thread.
struct IoState {
    stream: Box<dyn AudioStream>,
    scratch: Vec<u8>,
}

/// A stream's shared half.
///
/// The file thread fills the ring, the render thread drains it, and the API
/// thread allocates it and reads status. Stream I/O happens with the ring
/// unlocked, so the render thread is never held up by the disk.
pub struct StreamShared {
    state: Mutex<StreamState>,
    io: Mutex<IoState>,
    info: OnceLock<SampleInfo>,
    inited: AtomicBool,
    failed: AtomicBool,
}

impl StreamShared {
    pub fn new(stream: Box<dyn AudioStream>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StreamState {
                ring: None,
                ring_size: 0,
                primed: false,
                reset: false,
                warned: false,
                play_block: 0,
                next_block: None,
                num_blocks: None,
                stream_pos: 0,
                loop_count: 0,
                loop_count_set: false,
                read_loop_current: 0,
                play_loop_current: 0,
                read_done: false,
                play_done: false,
                loop_start: 0,
                loop_end: None,
                loop_set: false,
                release_loop: false,
            }),
            io: Mutex::new(IoState {
                stream,
                scratch: Vec::new(),
            }),
            info: OnceLock::new(),
            inited: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        })
    }

    pub fn sample_info(&self) -> Option<SampleInfo> {
        self.info.get().copied()
    }

    pub fn is_inited(&self) -> bool {
        self.inited.load(Ordering::Acquire) && !self.is_failed()
    }

    pub fn is_ready(&self) -> bool {
        if !self.is_inited() {
            return false;
        }
        let st = self.state.lock();
        st.primed && !st.reset
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Allocates the ring once the format is known. Call from the API thread.
    pub fn update(&self, stream_buffer_ms: f32) {
        if !self.is_inited() {
            return;
        }
        let Some(info) = self.sample_info() else {
            return;
        };
        let mut st = self.state.lock();
        if st.ring.is_some() {
            return;
        }
        let block_bytes = info.block_bytes as usize;
        let bytes_per_sec =
            info.sample_rate as f32 * block_bytes as f32 / info.block_frames.max(1) as f32;
        let mut size = (stream_buffer_ms * 0.001 * bytes_per_sec).round() as usize;
        size -= size % block_bytes;
        let size = size.max(block_bytes);
        st.ring = Some(VecDeque::with_capacity(size));
        st.ring_size = size;
        if !st.loop_set {
            st.loop_start = info.loop_start;
            st.loop_end = info.loop_end;
        }
        if !st.loop_count_set {
            st.loop_count = info.loop_count;
        }
        tracing::debug!("stream buffer allocated: {size} bytes");
    }

    /// Opens the stream and tops up the ring. Call from the file thread.
    pub fn file_update(&self) {
        if self.is_failed() {
            return;
        }
        let mut io = self.io.lock();

        if !self.inited.load(Ordering::Acquire) {
            match io.stream.init() {
                Ok(info) => {
                    let _ = self.info.set(info);
                    self.state.lock().num_blocks = io.stream.num_blocks();
                    self.inited.store(true, Ordering::Release);
                }
                Err(e) => {
                    tracing::error!("Could not open stream: {e}");
                    self.fail();
                    return;
                }
            }
            // the ring is allocated by the next update() on the API thread
        }

        let mut st = self.state.lock();
        if st.reset {
            if let Some(ring) = st.ring.as_mut() {
                ring.clear();
            }
            st.reset = false;
        }

        if !st.read_done && st.ring.is_some() && st.stored() < st.ring_size / 2 {
            self.fill(&mut st, &mut io);
            st.primed = true;
        }
    }

    fn fill(&self, st: &mut MutexGuard<'_, StreamState>, io: &mut IoState) {
        let Some(info) = self.sample_info() else {
            return;
        };
        let block_bytes = info.block_bytes as usize;
        let free = st.ring_size - st.stored();

        if st.release_loop || (st.loop_count >= 0 && st.read_loop_current >= st.loop_count) {
            let read = self.read_from_stream(st, io, free);
            if read < free {
                st.read_done = true;
            }
            return;
        }

        // the stream may not know its length, so a missing end means "until EOF"
        let (mut start, end) = st.loop_blocks(info.block_frames);

        let mut total = 0;
        let mut empty_reads = 0;
        while total < free && !self.is_failed() {
            let mut to_read = free - total;
            if let Some(end) = end {
                to_read = to_read.min(end.saturating_sub(st.stream_pos) as usize * block_bytes);
            }

            let read = self.read_from_stream(st, io, to_read);
            total += read;

            if end.is_some_and(|e| st.stream_pos >= e) || read < to_read {
                // hit the loop end or the end of the file
                start = start.min(st.stream_pos.saturating_sub(1));
                self.seek_stream(st, io, start);
                st.read_loop_current += 1;
            }
            if st.loop_count >= 0 {
                if st.read_loop_current > st.loop_count && read < to_read {
                    st.read_done = true;
                }
                if st.read_loop_current >= st.loop_count {
                    break;
                }
            }

            // an empty loop would spin forever
            empty_reads = if read == 0 { empty_reads + 1 } else { 0 };
            if empty_reads > 1 {
                break;
            }
        }
    }

    fn seek_stream(&self, st: &mut StreamState, io: &mut IoState, block: u32) {
        if let Err(e) = io.stream.set_block_pos(block) {
            tracing::error!("Stream seek failed: {e}");
            self.fail();
        }
        st.stream_pos = io.stream.block_pos();
    }

    fn read_from_stream(&self, st: &mut MutexGuard<'_, StreamState>, io: &mut IoState, bytes: usize) -> usize {
        if let Some(block) = st.next_block.take() {
            self.seek_stream(st, io, block);
            st.play_block = st.stream_pos;
        }

        let Some(info) = self.sample_info() else {
            return 0;
        };
        let block_bytes = info.block_bytes as usize;
        let mut bytes = bytes.min(st.ring_size - st.stored());
        bytes -= bytes % block_bytes;
        if bytes == 0 {
            return 0;
        }
        if io.scratch.len() < bytes {
            io.scratch.resize(st.ring_size, 0);
        }

        let IoState { stream, scratch } = io;
        let result = MutexGuard::unlocked(st, || stream.read(&mut scratch[..bytes], bytes / block_bytes));
        let blocks = match result {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Stream read failed: {e}");
                self.fail();
                0
            }
        };
        st.stream_pos = stream.block_pos();

        let read = (blocks * block_bytes).min(st.ring_size - st.stored());
        if let Some(ring) = st.ring.as_mut() {
            ring.extend(&scratch[..read]);
        }
        read
    }

    fn read(&self, buf: &mut [u8], blocks: usize) -> usize {
        let Some(info) = self.sample_info() else {
            return 0;
        };
        let mut st = self.state.lock();
        if st.play_done {
            return 0;
        }
        let block_bytes = info.block_bytes as usize;
        let block_frames = info.block_frames;

        let bytes = (blocks * block_bytes).min(buf.len());
        let read = match st.ring.as_mut() {
            Some(ring) => {
                let n = bytes.min(ring.len());
                let n = n - n % block_bytes;
                let (a, b) = ring.as_slices();
                let from_a = n.min(a.len());
                buf[..from_a].copy_from_slice(&a[..from_a]);
                buf[from_a..n].copy_from_slice(&b[..n - from_a]);
                ring.drain(..n);
                n
            }
            None => 0,
        };
        let blocks_read = read / block_bytes;
        st.play_block += blocks_read as u32;

        // wrap the play position the same way the reader wrapped the stream
        let (start, loop_end) = st.loop_blocks(block_frames);
        if let Some(end) = loop_end.or(st.num_blocks).filter(|&e| e > 0) {
            let start = start.min(end - 1);
            while (st.loop_count < 0 || st.play_loop_current < st.loop_count) && st.play_block >= end {
                st.play_block -= end - start;
                st.play_loop_current += 1;
            }
        }

        let mut underrun = false;
        if blocks_read < blocks {
            if st.read_done {
                st.play_done = true;
                st.play_block = 0;
            } else {
                underrun = true;
                if !st.warned {
                    tracing::warn!("Stream buffer underrun! Try increasing stream_buffer_ms.");
                    st.warned = true;
                }
            }
        }
        if !underrun {
            st.warned = false;
        }

        blocks_read
    }

    fn set_block_pos(&self, block: u32) {
        let Some(info) = self.sample_info() else {
            return;
        };
        let mut st = self.state.lock();
        let pos = st.play_block;
        if Some(block) == st.next_block || block == pos {
            return;
        }

        // a forward seek inside the buffered range just skips ahead
        if st.primed && !st.reset && block > pos {
            let block_bytes = info.block_bytes as usize;
            let skip = (block - pos) as usize * block_bytes;
            let half = st.ring_size / 2;
            if let Some(ring) = st.ring.as_mut().filter(|r| r.len() > skip) {
                ring.drain(..skip);
                let low = ring.len() < half;
                st.play_block = block;
                // nothing left to read means nothing left to refill
                if low && !st.read_done {
                    st.primed = false;
                }
                return;
            }
        }

        st.reset = true;
        st.primed = false;
        st.read_done = false;
        st.play_done = false;
        st.next_block = Some(block);
    }

    fn block_pos(&self) -> u32 {
        self.state.lock().play_block
    }

    fn num_blocks(&self) -> Option<u32> {
        self.state.lock().num_blocks
    }

    fn reset(&self) {
        if !self.inited.load(Ordering::Acquire) {
            return;
        }
        let mut st = self.state.lock();
        st.reset = true;
        st.play_block = 0;
        st.next_block = Some(0);
        st.read_loop_current = 0;
        st.play_loop_current = 0;
        st.read_done = false;
        st.play_done = false;
        st.primed = false;
        st.release_loop = false;
    }

    fn is_done(&self) -> bool {
        self.state.lock().play_done
    }

    pub fn set_loop(&self, start_frame: u32, end_frame: Option<u32>) {
        let mut st = self.state.lock();
        st.loop_set = true;
        st.loop_start = start_frame;
        st.loop_end = end_frame;
    }

    pub fn loop_window(&self) -> (u32, Option<u32>) {
        let st = self.state.lock();
        (st.loop_start, st.loop_end)
    }

    pub fn set_loop_count(&self, count: i32) {
        let mut st = self.state.lock();
        st.loop_count_set = true;
        st.loop_count = count;
    }

    pub fn loop_count(&self) -> i32 {
        self.state.lock().loop_count
    }

    pub fn current_loop(&self) -> i32 {
        self.state.lock().play_loop_current
    }

    pub fn release_loop(&self) {
        self.state.lock().release_loop = true;
    }

    pub fn is_loop_released(&self) -> bool {
        self.state.lock().release_loop
    }
}

/// Render-side handle to a stream.
pub struct StreamSource {
    shared: Arc<StreamShared>,
}

impl StreamSource {
    pub fn new(shared: Arc<StreamShared>) -> Self {
        Self { shared }
    }

    pub fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }
}

impl AudioSource for StreamSource {
    delegate! {
        to self.shared {
            fn read(&mut self, buf: &mut [u8], blocks: usize) -> usize;
            fn num_blocks(&self) -> Option<u32>;
            fn set_block_pos(&mut self, block: u32);
            fn block_pos(&self) -> u32;
            fn reset(&mut self);
            fn sample_info(&self) -> Option<SampleInfo>;
            fn is_inited(&self) -> bool;
            fn is_ready(&self) -> bool;
            fn is_failed(&self) -> bool;
            fn is_done(&self) -> bool;
            fn set_loop(&mut self, start_frame: u32, end_frame: Option<u32>);
            fn loop_window(&self) -> (u32, Option<u32>);
            fn set_loop_count(&mut self, count: i32);
            fn loop_count(&self) -> i32;
            fn current_loop(&self) -> i32;
            fn release_loop(&mut self);
            fn is_loop_released(&self) -> bool;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::AudioFormat;
    use crate::stream::MemoryStream;

    fn stream(frames: u8) -> Arc<StreamShared> {
        let info = SampleInfo::pcm(AudioFormat::PcmI8, 1, 1000, Some(frames as u32));
        let data: Vec<u8> = (0..frames).collect();
        StreamShared::new(Box::new(MemoryStream::new(info, data)))
    }

    #[test]
    fn fills_after_init_and_update() {
        let shared = stream(8);
        assert!(!shared.is_inited());
        shared.file_update();
        assert!(shared.is_inited());
        assert!(!shared.is_ready());
        // 16 ms at 1000 bytes/s
        shared.update(16.0);
        shared.file_update();
        assert!(shared.is_ready());

        let mut src = StreamSource::new(shared.clone());
        let mut buf = [0u8; 16];
        assert_eq!(src.read(&mut buf, 5), 5);
        assert_eq!(&buf[..5], &[0, 1, 2, 3, 4]);
        assert_eq!(src.block_pos(), 5);
        assert_eq!(src.read(&mut buf, 5), 3);
        assert!(src.is_done());
    }

    #[test]
    fn loops_through_ring() {
        let shared = stream(4);
        shared.set_loop_count(1);
        shared.file_update();
        shared.update(16.0);
        // one pass per loop
        shared.file_update();
        shared.file_update();

        let mut src = StreamSource::new(shared.clone());
        let mut buf = [0u8; 16];
        assert_eq!(src.read(&mut buf, 8), 8);
        assert_eq!(&buf[..8], &[0, 1, 2, 3, 0, 1, 2, 3]);
        assert_eq!(src.current_loop(), 1);
        src.read(&mut buf, 1);
        assert!(src.is_done());
    }

    #[test]
    fn loop_end_rounds_the_same_for_reader_and_player() {
        let mut info = SampleInfo::pcm(AudioFormat::PcmI8, 1, 1000, Some(4));
        info.block_frames = 2;
        info.block_bytes = 2;
        let shared = StreamShared::new(Box::new(MemoryStream::new(info, (0..8).collect())));
        // frame 5 rounds to block 3
        shared.set_loop(0, Some(5));
        shared.set_loop_count(1);
        shared.file_update();
        shared.update(16.0);
        shared.file_update();

        let mut src = StreamSource::new(shared.clone());
        let mut buf = [0u8; 16];
        assert_eq!(src.read(&mut buf, 3), 3);
        assert_eq!(&buf[..6], &[0, 1, 2, 3, 4, 5]);
        assert_eq!(src.current_loop(), 1);
        assert_eq!(src.block_pos(), 0);
    }

    #[test]
    fn forward_seek_within_buffer_skips() {
        let shared = stream(8);
        shared.file_update();
        shared.update(16.0);
        shared.file_update();
        let mut src = StreamSource::new(shared.clone());
        src.set_block_pos(2);
        assert!(shared.is_ready());
        let mut buf = [0u8; 2];
        assert_eq!(src.read(&mut buf, 2), 2);
        assert_eq!(buf, [2, 3]);

        // backward seek needs a refill
        src.set_block_pos(0);
        assert!(!shared.is_ready());
        shared.file_update();
        assert!(shared.is_ready());
        assert_eq!(src.read(&mut buf, 2), 2);
        assert_eq!(buf, [0, 1]);
    }
}
