//! Mixers: a tree of volume and pause scopes that sounds hang off.
//!
//! A mixer's mixed volume is its own volume times its parent's mixed
//! volume, and it is paused if it or any ancestor is. Changes recompute the
//! mixed values and only cascade to sounds and child mixers when those
//! values actually changed.

use crate::arena::arena_key;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::sound::SoundId;

arena_key!(
    /// Handle to a mixer.
    MixerId
);

pub(crate) struct MixerState {
    pub name: String,
    pub parent: Option<MixerId>,
    pub children: Vec<MixerId>,
    pub sounds: Vec<SoundId>,
    pub volume: f32,
    pub mixed_volume: f32,
    pub paused: bool,
    pub mixed_paused: bool,
}

impl MixerState {
    pub fn new(name: String, parent: Option<MixerId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            sounds: Vec::new(),
            volume: 1.0,
            mixed_volume: 1.0,
            paused: false,
            mixed_paused: false,
        }
    }
}

impl Engine {
    fn mixer(&self, id: MixerId) -> Result<&MixerState> {
        self.mixers.get(id).ok_or(Error::StaleHandle)
    }

    fn mixer_mut(&mut self, id: MixerId) -> Result<&mut MixerState> {
        self.mixers.get_mut(id).ok_or(Error::StaleHandle)
    }

    /// The root of the mixer tree. It can't be destroyed or reparented.
    pub fn master_mixer(&self) -> MixerId {
        self.master
    }

    /// Creates a mixer under `parent`, or under the master mixer.
    pub fn new_mixer(&mut self, name: &str, parent: Option<MixerId>) -> Result<MixerId> {
        let parent = parent.unwrap_or(self.master);
        self.mixer(parent)?;
        let id = self.mixers.insert(MixerState::new(name.into(), Some(parent)));
        self.mixer_mut(parent)?.children.push(id);
        self.update_mixer(id);
        tracing::debug!("new mixer \"{name}\"");
        Ok(id)
    }

    /// Destroys a mixer, moving its sounds and child mixers up to its parent.
    pub fn destroy_mixer(&mut self, id: MixerId) -> Result<()> {
        if id == self.master {
            return Self::usage(Error::DestroyMasterMixer);
        }
        let parent = self.mixer(id)?.parent.unwrap_or(self.master);
        let Some(state) = self.mixers.remove(id) else {
            return Err(Error::StaleHandle);
        };

        if let Some(p) = self.mixers.get_mut(parent) {
            p.children.retain(|&c| c != id);
            p.children.extend_from_slice(&state.children);
            p.sounds.extend_from_slice(&state.sounds);
        }
        for &sound in &state.sounds {
            if let Some(s) = self.sounds.get_mut(sound) {
                s.mixer = parent;
            }
            self.refresh_sound_mix(sound);
        }
        for &child in &state.children {
            if let Some(c) = self.mixers.get_mut(child) {
                c.parent = Some(parent);
            }
            self.update_mixer(child);
        }
        Ok(())
    }

    pub fn set_mixer_volume(&mut self, id: MixerId, volume: f32) -> Result<()> {
        let m = self.mixer_mut(id)?;
        if m.volume != volume {
            m.volume = volume;
            self.update_mixer(id);
        }
        Ok(())
    }

    pub fn mixer_volume(&self, id: MixerId) -> Result<f32> {
        Ok(self.mixer(id)?.volume)
    }

    /// Volume after multiplying in every ancestor.
    pub fn mixer_mixed_volume(&self, id: MixerId) -> Result<f32> {
        Ok(self.mixer(id)?.mixed_volume)
    }

    pub fn set_mixer_paused(&mut self, id: MixerId, paused: bool) -> Result<()> {
        let m = self.mixer_mut(id)?;
        if m.paused != paused {
            m.paused = paused;
            self.update_mixer(id);
        }
        Ok(())
    }

    pub fn mixer_paused(&self, id: MixerId) -> Result<bool> {
        Ok(self.mixer(id)?.paused)
    }

    /// Whether this mixer or any ancestor is paused.
    pub fn mixer_mixed_paused(&self, id: MixerId) -> Result<bool> {
        Ok(self.mixer(id)?.mixed_paused)
    }

    /// Reparents a mixer; `None` means the master mixer.
    pub fn set_mixer_parent(&mut self, id: MixerId, parent: Option<MixerId>) -> Result<()> {
        if id == self.master {
            return Self::usage(Error::MasterMixerParent);
        }
        let parent = parent.unwrap_or(self.master);
        self.mixer(id)?;
        self.mixer(parent)?;

        let mut ancestor = Some(parent);
        while let Some(a) = ancestor {
            if a == id {
                return Self::usage(Error::MixerParentCycle);
            }
            ancestor = self.mixers.get(a).and_then(|m| m.parent);
        }

        let old = self.mixer_mut(id)?.parent.replace(parent);
        if let Some(old) = old.and_then(|o| self.mixers.get_mut(o)) {
            old.children.retain(|&c| c != id);
        }
        self.mixer_mut(parent)?.children.push(id);
        self.update_mixer(id);
        Ok(())
    }

    pub fn mixer_parent(&self, id: MixerId) -> Result<Option<MixerId>> {
        Ok(self.mixer(id)?.parent)
    }

    /// Looks a mixer up by name, master first, then in creation order.
    pub fn find_mixer(&self, name: &str) -> Option<MixerId> {
        let found = self
            .mixers
            .iter()
            .find(|(_, m)| m.name == name)
            .map(|(id, _)| id);
        if found.is_none() {
            tracing::info!("Couldn't find mixer named \"{name}\"");
        }
        found
    }

    pub fn mixer_name(&self, id: MixerId) -> Result<&str> {
        Ok(&self.mixer(id)?.name)
    }

    pub fn set_mixer_name(&mut self, id: MixerId, name: &str) -> Result<()> {
        self.mixer_mut(id)?.name = name.into();
        Ok(())
    }

    /// Recomputes mixed values, cascading only what changed.
    pub(crate) fn update_mixer(&mut self, id: MixerId) {
        let Some(m) = self.mixers.get(id) else {
            return;
        };
        let (parent_volume, parent_paused) = m
            .parent
            .and_then(|p| self.mixers.get(p))
            .map_or((1.0, false), |p| (p.mixed_volume, p.mixed_paused));
        let volume = m.volume * parent_volume;
        let paused = m.paused || parent_paused;

        let Some(m) = self.mixers.get_mut(id) else {
            return;
        };
        let volume_changed = m.mixed_volume != volume;
        let paused_changed = m.mixed_paused != paused;
        m.mixed_volume = volume;
        m.mixed_paused = paused;
        if !volume_changed && !paused_changed {
            return;
        }
        let sounds = m.sounds.clone();
        let children = m.children.clone();

        for sound in sounds {
            if volume_changed {
                self.update_volume_and_pan(sound);
            }
            if paused_changed {
                self.update_paused(sound);
            }
        }
        for child in children {
            self.update_mixer(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, EngineConfig, Error};

    fn engine() -> Engine {
        Engine::new(EngineConfig::default().with_max_nodes(16)).unwrap()
    }

    #[test]
    fn reparenting_under_a_descendant_fails() {
        let mut e = engine();
        let a = e.new_mixer("a", None).unwrap();
        let b = e.new_mixer("b", Some(a)).unwrap();
        assert!(matches!(e.set_mixer_parent(a, Some(b)), Err(Error::MixerParentCycle)));
        assert!(matches!(e.set_mixer_parent(a, Some(a)), Err(Error::MixerParentCycle)));
        assert_eq!(e.mixer_parent(a).unwrap(), Some(e.master_mixer()));
        let master = e.master_mixer();
        assert!(matches!(e.set_mixer_parent(master, Some(a)), Err(Error::MasterMixerParent)));
    }

    #[test]
    fn destroy_moves_children_up() {
        let mut e = engine();
        let a = e.new_mixer("a", None).unwrap();
        let b = e.new_mixer("b", Some(a)).unwrap();
        e.set_mixer_volume(a, 0.5).unwrap();
        e.set_mixer_volume(b, 0.5).unwrap();
        assert_eq!(e.mixer_mixed_volume(b).unwrap(), 0.25);

        e.destroy_mixer(a).unwrap();
        assert_eq!(e.mixer_parent(b).unwrap(), Some(e.master_mixer()));
        assert_eq!(e.mixer_mixed_volume(b).unwrap(), 0.5);
        assert!(matches!(e.mixer_volume(a), Err(Error::StaleHandle)));
        let master = e.master_mixer();
        assert!(matches!(e.destroy_mixer(master), Err(Error::DestroyMasterMixer)));
    }

    #[test]
    fn pause_cascades() {
        let mut e = engine();
        let a = e.new_mixer("a", None).unwrap();
        let b = e.new_mixer("b", Some(a)).unwrap();
        e.set_mixer_paused(a, true).unwrap();
        assert!(e.mixer_mixed_paused(b).unwrap());
        assert!(!e.mixer_paused(b).unwrap());
        e.set_mixer_paused(a, false).unwrap();
        assert!(!e.mixer_mixed_paused(b).unwrap());
    }

    #[test]
    fn find_by_name() {
        let mut e = engine();
        let fx = e.new_mixer("fx", None).unwrap();
        assert_eq!(e.find_mixer("fx"), Some(fx));
        assert_eq!(e.find_mixer("master"), Some(e.master_mixer()));
        assert_eq!(e.find_mixer("nope"), None);
        assert_eq!(e.mixer_name(fx).unwrap(), "fx");
    }
}
