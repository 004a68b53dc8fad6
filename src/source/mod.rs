//! Encoded audio plus loop and position state.
//!
//! A source hands out raw blocks; a [`Decoder`](crate::decoder::Decoder)
//! turns them into samples. [`BufferSource`] reads a memory-resident sample,
//! [`StreamSource`] reads a ring buffer the [`FileThread`] keeps topped up.

mod buffer;
mod file_thread;
mod stream;

pub use buffer::BufferSource;
pub use file_thread::FileThread;
pub use stream::{StreamShared, StreamSource};

use crate::decoder::SampleInfo;

/// Encoded blocks with loop and position state.
///
/// Positions are in blocks; loop points are in frames.
pub trait AudioSource {
    /// Reads up to `blocks` blocks into `buf`, returning the number read.
    fn read(&mut self, buf: &mut [u8], blocks: usize) -> usize;

    /// Total blocks, if known.
    fn num_blocks(&self) -> Option<u32>;

    fn set_block_pos(&mut self, block: u32);

    fn block_pos(&self) -> u32;

    /// Rewinds and clears loop progress, ready to play again.
    fn reset(&mut self);

    /// Available once [`is_inited`](Self::is_inited).
    fn sample_info(&self) -> Option<SampleInfo>;

    /// The format is known.
    fn is_inited(&self) -> bool;

    /// Enough data is buffered to play.
    fn is_ready(&self) -> bool;

    /// Loading failed; sticky.
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

/// The source a [`SourceNode`](crate::nodes::SourceNode) plays from.
#[enum_delegate::implement(AudioSource,
    pub trait AudioSource {
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
)]
pub enum SourceKind {
    Buffer(BufferSource),
    Stream(StreamSource),
}

/// Converts a loop frame to a block index.
#[inline]
pub(crate) fn frame_to_block(frame: u32, block_frames: u16) -> u32 {
    (frame as f32 / block_frames.max(1) as f32).round() as u32
}
