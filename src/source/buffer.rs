use std::sync::Arc;

use super::{frame_to_block, AudioSource};
use crate::decoder::SampleInfo;

/// Plays a memory-resident sample.
///
/// The data is shared with the bank it came from; each source keeps its own
/// read position and loop progress.
pub struct BufferSource {
    info: SampleInfo,
    data: Arc<[u8]>,
    pos: usize,
    loop_count: i32,
    loop_current: i32,
    loop_start: u32,
    loop_end: Option<u32>,
    release_loop: bool,
}

impl BufferSource {
    pub fn new(info: SampleInfo, data: Arc<[u8]>) -> Self {
        debug_assert!(info.block_bytes > 0);
        debug_assert_eq!(data.len() % info.block_bytes as usize, 0);
        Self {
            loop_count: info.loop_count,
            loop_start: info.loop_start,
            loop_end: info.loop_end,
            info,
            data,
            pos: 0,
            loop_current: 0,
            release_loop: false,
        }
    }

    #[inline]
    fn is_looping(&self) -> bool {
        !self.release_loop && (self.loop_count < 0 || self.loop_current < self.loop_count)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data.len().saturating_sub(self.pos));
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

impl AudioSource for BufferSource {
    fn read(&mut self, buf: &mut [u8], blocks: usize) -> usize {
        let block_bytes = self.info.block_bytes as usize;
        let bytes = (blocks * block_bytes).min(buf.len() - buf.len() % block_bytes);
        let end_block = self.data.len() / block_bytes;
        if end_block == 0 {
            return 0;
        }

        if !self.is_looping() {
            return self.read_bytes(&mut buf[..bytes]) / block_bytes;
        }

        let bf = self.info.block_frames;
        let start = (frame_to_block(self.loop_start, bf) as usize).min(end_block - 1);
        let mut end = match self.loop_end {
            Some(e) => (frame_to_block(e, bf) as usize).clamp(1, end_block),
            None => end_block,
        };
        if end <= start {
            end = start + 1;
        }
        let (start, end) = (start * block_bytes, end * block_bytes);

        let mut read = 0;
        while read < bytes {
            let n = (bytes - read).min(end.saturating_sub(self.pos));
            read += self.read_bytes(&mut buf[read..read + n]);
            if self.pos >= end {
                self.pos = start;
                self.loop_current += 1;
            }
            if self.loop_count >= 0 && self.loop_current >= self.loop_count {
                break;
            }
        }
        read / block_bytes
    }

    fn num_blocks(&self) -> Option<u32> {
        Some((self.data.len() / self.info.block_bytes as usize) as u32)
    }

    fn set_block_pos(&mut self, block: u32) {
        self.pos = (block as usize * self.info.block_bytes as usize).min(self.data.len());
    }

    fn block_pos(&self) -> u32 {
        (self.pos / self.info.block_bytes as usize) as u32
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.loop_current = 0;
        self.release_loop = false;
    }

    fn sample_info(&self) -> Option<SampleInfo> {
        Some(self.info)
    }

    fn is_inited(&self) -> bool {
        true
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn is_failed(&self) -> bool {
        false
    }

    fn is_done(&self) -> bool {
        !self.is_looping() && self.pos >= self.data.len()
    }

    fn set_loop(&mut self, start_frame: u32, end_frame: Option<u32>) {
        self.loop_start = start_frame;
        self.loop_end = end_frame;
    }

    fn loop_window(&self) -> (u32, Option<u32>) {
        (self.loop_start, self.loop_end)
    }

    fn set_loop_count(&mut self, count: i32) {
        self.loop_count = count;
    }

    fn loop_count(&self) -> i32 {
        self.loop_count
    }

    fn current_loop(&self) -> i32 {
        self.loop_current
    }

    fn release_loop(&mut self) {
        self.release_loop = true;
    }

    fn is_loop_released(&self) -> bool {
        self.release_loop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::AudioFormat;

    fn source(frames: u8) -> BufferSource {
        let info = SampleInfo::pcm(AudioFormat::PcmI8, 1, 8000, Some(frames as u32));
        BufferSource::new(info, (0..frames).collect::<Vec<u8>>().into())
    }

    #[test]
    fn plays_through_without_loop() {
        let mut src = source(4);
        let mut buf = [0u8; 8];
        assert_eq!(src.read(&mut buf, 8), 4);
        assert_eq!(&buf[..4], &[0, 1, 2, 3]);
        assert!(src.is_done());
        src.reset();
        assert!(!src.is_done());
        assert_eq!(src.block_pos(), 0);
    }

    #[test]
    fn loops_counted_times() {
        let mut src = source(4);
        src.set_loop(1, Some(3));
        src.set_loop_count(2);
        let mut buf = [0u8; 16];
        // 0 1 2 | 1 2 | 1 2 3
        assert_eq!(src.read(&mut buf, 5), 5);
        assert_eq!(&buf[..5], &[0, 1, 2, 1, 2]);
        assert_eq!(src.current_loop(), 2);
        assert!(!src.is_done());
        assert_eq!(src.read(&mut buf, 16), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert!(src.is_done());
    }

    #[test]
    fn infinite_loop_until_released() {
        let mut src = source(2);
        src.set_loop_count(-1);
        let mut buf = [0u8; 7];
        assert_eq!(src.read(&mut buf, 7), 7);
        assert_eq!(buf, [0, 1, 0, 1, 0, 1, 0]);
        assert!(!src.is_done());
        src.release_loop();
        assert!(src.is_loop_released());
        assert_eq!(src.read(&mut buf, 7), 1);
        assert!(src.is_done());
    }
}
