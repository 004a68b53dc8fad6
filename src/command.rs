//! Messages between the API thread and the render thread.
//!
//! [`Command`]s flow API → render over one bounded SPSC ring, so commands to
//! the same node keep their order. [`Retired`] tokens flow back the other way
//! carrying everything the render thread is done with, so it never frees
//! memory itself.

use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::capture::CaptureWriter;
use crate::decoder::Decoder;
use crate::node::{NodeId, RenderNode};
use crate::nodes::{EffectBusMessage, EffectMessage, MixMessage, SourceMessage};

/// A user callback run on the render thread before or after each pass.
pub type Hook = Box<dyn FnMut() + Send>;

pub enum Command {
    /// Places a new node in the render table.
    Insert(NodeId, Box<RenderNode>),
    Source(NodeId, SourceMessage),
    Mix(NodeId, MixMessage),
    Bus(NodeId, EffectBusMessage),
    Effect(NodeId, EffectMessage),
    /// Removes a node and sends it back as [`Retired::Node`].
    Free(NodeId),
    SetVolumeRate(f32),
    SetPreRender(Option<Hook>),
    SetPostRender(Option<Hook>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Insert(..) => "insert",
            Command::Source(..) => "source",
            Command::Mix(..) => "mix",
            Command::Bus(..) => "effect bus",
            Command::Effect(..) => "effect",
            Command::Free(..) => "free",
            Command::SetVolumeRate(..) => "set volume rate",
            Command::SetPreRender(..) => "set pre-render hook",
            Command::SetPostRender(..) => "set post-render hook",
        }
    }
}

/// Things the render thread hands back to be dropped on the API thread.
pub enum Retired {
    Node(NodeId, Box<RenderNode>),
    Buffer(Box<[f32]>),
    Decoder(Box<dyn Decoder>),
    Hook(Hook),
    /// A capture file that failed mid-write.
    Capture(CaptureWriter),
}

/// Producer half of the command ring.
pub struct CommandQueue {
    producer: Producer<Command>,
    capacity: usize,
    dropped: u64,
}

impl CommandQueue {
    /// Creates the queue and the consumer the renderer drains.
    pub fn new(capacity: usize) -> (Self, Consumer<Command>) {
        let capacity = capacity.max(1);
        let (producer, consumer) = RingBuffer::new(capacity);
        (
            Self {
                producer,
                capacity,
                dropped: 0,
            },
            consumer,
        )
    }

    /// Queues a command.
    ///
    /// When the ring is full the command is handed back, counted and logged
    /// once.
    pub fn push(&mut self, cmd: Command) -> Result<(), Command> {
        self.producer.push(cmd).map_err(|PushError::Full(cmd)| {
            self.dropped += 1;
            tracing::warn!(
                "Audio command queue full; dropping {} command. Consider increasing max_audio_tasks.",
                cmd.name()
            );
            cmd
        })
    }

    /// Total number of commands dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots left in the ring.
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}
