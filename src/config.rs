//! Engine configuration.

/// Startup configuration for an [`Engine`](crate::Engine).
///
/// All fields have sensible defaults; override them with the `with_*` builders.
///
/// ```
/// use zirp::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_sample_rate(44100)
///     .with_max_audio_tasks(1000);
/// assert_eq!(config.sample_rate, 44100);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Nominal length of one render pass, in ms.
    pub audio_update_ms: f32,
    /// Amount of audio buffered ahead for each stream, in ms.
    pub stream_buffer_ms: f32,
    /// How often the file thread tops up stream buffers, in ms.
    pub stream_file_update_ms: f32,
    /// Capacity of the API → render command queue.
    pub max_audio_tasks: usize,
    /// Fraction of `audio_update_ms` a pass may spend before mix nodes start skipping inputs.
    pub max_render_load: f32,
    /// Default volume ramp time, in ms.
    pub volume_ramp_ms: f32,
    /// Maximum number of live render nodes.
    pub max_nodes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            audio_update_ms: 5.0,
            stream_buffer_ms: 500.0,
            stream_file_update_ms: 100.0,
            max_audio_tasks: 500,
            max_render_load: 0.8,
            volume_ramp_ms: 40.0,
            max_nodes: 1024,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_audio_update_ms(mut self, ms: f32) -> Self {
        self.audio_update_ms = ms;
        self
    }

    pub fn with_stream_buffer_ms(mut self, ms: f32) -> Self {
        self.stream_buffer_ms = ms;
        self
    }

    pub fn with_stream_file_update_ms(mut self, ms: f32) -> Self {
        self.stream_file_update_ms = ms;
        self
    }

    pub fn with_max_audio_tasks(mut self, tasks: usize) -> Self {
        self.max_audio_tasks = tasks;
        self
    }

    pub fn with_max_render_load(mut self, load: f32) -> Self {
        self.max_render_load = load;
        self
    }

    pub fn with_volume_ramp_ms(mut self, ms: f32) -> Self {
        self.volume_ramp_ms = ms;
        self
    }

    pub fn with_max_nodes(mut self, nodes: usize) -> Self {
        self.max_nodes = nodes;
        self
    }

    /// Frames per render buffer.
    ///
    /// Twice the nominal update size, so a source can read ahead at 2x speed.
    pub fn buffer_frames(&self) -> usize {
        (self.sample_rate as f32 * self.audio_update_ms * 0.001 * 2.0).round() as usize
    }

    /// Per-sample volume change used by the ramping pan functions.
    pub fn volume_rate(&self) -> f32 {
        volume_rate(self.volume_ramp_ms, self.sample_rate)
    }
}

/// Per-sample volume step for a ramp of `ramp_ms` at `sample_rate`.
///
/// Ramps shorter than one sample are treated as instant.
pub(crate) fn volume_rate(ramp_ms: f32, sample_rate: u32) -> f32 {
    let ramp_secs = ramp_ms * 0.001;
    if ramp_secs <= 1.0 / sample_rate as f32 {
        10.0
    } else {
        1.0 / (ramp_secs * sample_rate as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.sample_rate, 48000);
        assert_eq!(c.max_audio_tasks, 500);
        assert_eq!(c.buffer_frames(), 480);
    }

    #[test]
    fn instant_ramp() {
        assert_eq!(volume_rate(0.0, 48000), 10.0);
        let rate = volume_rate(40.0, 48000);
        assert!((rate - 1.0 / 1920.0).abs() < 1e-9);
    }
}
