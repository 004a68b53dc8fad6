//! Generational arena used for every API-side object table.
//!
//! Keys carry a generation, so a key to a removed object never aliases a
//! newer object that reuses its slot.

use core::marker::PhantomData;

/// Keys that index into an [`Arena`].
pub trait ArenaKey: Copy {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn index(&self) -> u32;
    fn generation(&self) -> u32;
}

/// Declares a public arena key type.
macro_rules! arena_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $crate::arena::ArenaKey for $name {
            #[inline]
            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            #[inline]
            fn index(&self) -> u32 {
                self.index
            }

            #[inline]
            fn generation(&self) -> u32 {
                self.generation
            }
        }
    };
}
pub(crate) use arena_key;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct Arena<K: ArenaKey, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Arena<K, T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> K {
        self.insert_with(|_| value)
    }

    /// Inserts a value built from its own key.
    pub fn insert_with(&mut self, f: impl FnOnce(K) -> T) -> K {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let key = K::from_parts(index, slot.generation);
                slot.value = Some(f(key));
                key
            }
            None => {
                let index = self.slots.len() as u32;
                let key = K::from_parts(index, 0);
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(f(key)),
                });
                key
            }
        }
    }

    pub fn remove(&mut self, key: K) -> Option<T> {
        let slot = self.slots.get_mut(key.index() as usize)?;
        if slot.generation != key.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index());
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.slots
            .get(key.index() as usize)
            .filter(|s| s.generation == key.generation())
            .and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots
            .get_mut(key.index() as usize)
            .filter(|s| s.generation == key.generation())
            .and_then(|s| s.value.as_mut())
    }

    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value
                .as_ref()
                .map(|v| (K::from_parts(i as u32, s.generation), v))
        })
    }
}
