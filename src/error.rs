//! Error types for the engine's API surface.
//!
//! Nothing in here ever reaches the render thread: render-side problems
//! degrade to silence or a skipped command and are reported through `tracing`.

use thiserror::Error;

/// Errors returned by [`Engine`](crate::Engine) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// WAV reading or writing failed.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Filesystem or stream I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ogg Vorbis decoding failed.
    #[cfg(feature = "vorbis_src")]
    #[error("Vorbis error: {0}")]
    Vorbis(#[from] lewton::VorbisError),

    /// The output device could not be opened or started.
    #[error("output device error: {0}")]
    Device(String),

    /// No output device is available.
    #[error("no output device available")]
    NoDevice,

    /// The sample format has no decoder.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// A handle refers to an object that has been destroyed.
    #[error("stale handle")]
    StaleHandle,

    /// The render graph has no free node slots.
    #[error("too many audio nodes (max {0})")]
    TooManyNodes(usize),

    /// The command queue was full and a new node never reached the render thread.
    #[error("audio command queue is full")]
    QueueFull,

    /// Loop start must be before loop end.
    #[error("loop start frame must be less than end frame")]
    InvalidLoop,

    /// Loop points can only change while a stream is stopped.
    #[error("can't set loop points on a playing stream")]
    LoopOnPlayingStream,

    #[error("can't set effect bus's output to itself")]
    BusOutputToSelf,

    #[error("can't set the output on the global output effect bus")]
    GlobalBusOutput,

    #[error("can't destroy the global effect bus")]
    DestroyGlobalBus,

    #[error("can't destroy the master mixer")]
    DestroyMasterMixer,

    #[error("master mixer cannot have a parent")]
    MasterMixerParent,

    #[error("cannot parent a mixer to itself or its descendants")]
    MixerParentCycle,

    /// No effect factory is registered for this id.
    #[error("effect factory not registered for id {0}")]
    UnknownEffect(i32),

    /// The effect factory returned nothing.
    #[error("effect factory for id {0} returned no processor")]
    EffectFactoryFailed(i32),

    /// Capture paths must end in `.wav` or `.raw`.
    #[error("cannot capture to {0}; must have extension .raw or .wav")]
    CaptureExtension(String),

    /// The bank a sound came from has been unloaded.
    #[error("bank has been unloaded")]
    BankUnloaded,

    /// A named sample or sound index does not exist.
    #[error("could not find sample \"{0}\"")]
    SampleNotFound(String),

    /// The sound failed to load and can't be played.
    #[error("sound failed to load")]
    SoundFailed,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
