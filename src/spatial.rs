//! Hooks for positional audio.
//!
//! The engine doesn't do any 3D math itself. A host that wants positional
//! sounds supplies a [`Spatializer`]; the engine feeds it the listener and
//! each 3D sound's position every update, and applies what comes back.

use std::time::{Duration, Instant};

/// Below this spatial volume a 3D sound goes virtual.
pub(crate) const VIRTUAL_VOLUME: f32 = 0.005;

/// Pan changes are ignored below this spatial volume.
pub(crate) const AUDIBLE_VOLUME: f32 = 0.001;

/// Where the listener is and which way it faces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Listener {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub look_at: [f32; 3],
    /// Normalized.
    pub up: [f32; 3],
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            velocity: [0.0; 3],
            look_at: [0.0, 0.0, 1.0],
            up: [0.0, 1.0, 0.0],
        }
    }
}

/// What a spatializer decides for one sound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialParams {
    /// Distance attenuation in `[0, 1]`.
    pub volume: f32,
    /// `-1` hard left to `1` hard right.
    pub pan: f32,
    /// Doppler speed factor.
    pub speed: f32,
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            speed: 1.0,
        }
    }
}

/// Maps a sound's position and velocity to volume, pan and speed.
pub trait Spatializer: Send {
    fn spatialize(&self, listener: &Listener, position: [f32; 3], velocity: [f32; 3]) -> SpatialParams;
}

impl<F> Spatializer for F
where
    F: Fn(&Listener, [f32; 3], [f32; 3]) -> SpatialParams + Send,
{
    fn spatialize(&self, listener: &Listener, position: [f32; 3], velocity: [f32; 3]) -> SpatialParams {
        self(listener, position, velocity)
    }
}

/// Per-sound 3D state kept on the API thread.
#[derive(Debug, Default)]
pub(crate) struct SpatialState {
    pub enabled: bool,
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub params: SpatialParams,
    pub is_virtual: bool,
    /// Estimated time left when the sound went virtual; `None` never stops.
    pub stop_ms: Option<f32>,
    pub timer: VirtualTimer,
}

/// Pausable stopwatch for virtual sounds.
#[derive(Debug, Default)]
pub(crate) struct VirtualTimer {
    started: Option<Instant>,
    elapsed: Duration,
}

impl VirtualTimer {
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(t) = self.started.take() {
            self.elapsed += t.elapsed();
        }
    }

    pub fn reset(&mut self) {
        self.started = None;
        self.elapsed = Duration::ZERO;
    }

    pub fn elapsed_ms(&self) -> f32 {
        let running = self.started.map_or(Duration::ZERO, |t| t.elapsed());
        (self.elapsed + running).as_secs_f32() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_timer_holds_its_time() {
        let mut timer = VirtualTimer::default();
        assert_eq!(timer.elapsed_ms(), 0.0);
        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        timer.stop();
        let held = timer.elapsed_ms();
        assert!(held >= 5.0);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(timer.elapsed_ms(), held);
        timer.reset();
        assert_eq!(timer.elapsed_ms(), 0.0);
    }

    #[test]
    fn closures_are_spatializers() {
        let s = |_: &Listener, p: [f32; 3], _: [f32; 3]| SpatialParams {
            volume: 1.0 / (1.0 + p[0].abs()),
            ..SpatialParams::default()
        };
        let out = s.spatialize(&Listener::default(), [3.0, 0.0, 0.0], [0.0; 3]);
        assert_eq!(out.volume, 0.25);
        assert_eq!(out.speed, 1.0);
    }
}
