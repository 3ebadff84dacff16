//! Generational slot arena.
//!
//! A [`Handle`] names a slot and the generation it was allocated in. Freeing
//! a slot bumps its generation, so a stale handle never resolves to whatever
//! is allocated there later.

use crate::error::{LoaderError, try_reserve};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle {
  index: u32,
  generation: u32,
}

impl Handle {
  pub fn index(self) -> u32 {
    self.index
  }

  pub fn generation(self) -> u32 {
    self.generation
  }
}

#[derive(Debug)]
struct Slot<T> {
  generation: u32,
  value: Option<T>,
}

#[derive(Debug)]
pub struct Arena<T> {
  slots: Vec<Slot<T>>,
  free: Vec<u32>,
  len: usize,
}

impl<T> Default for Arena<T> {
  fn default() -> Self {
    Self {
      slots: Vec::new(),
      free: Vec::new(),
      len: 0,
    }
  }
}

impl<T> Arena<T> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, value: T) -> Result<Handle, LoaderError> {
    if let Some(index) = self.free.pop() {
      let slot = &mut self.slots[index as usize];
      slot.value = Some(value);
      self.len += 1;
      return Ok(Handle {
        index,
        generation: slot.generation,
      });
    }

    let index = u32::try_from(self.slots.len()).map_err(|_| LoaderError::OutOfMemory)?;
    try_reserve(&mut self.slots, 1)?;
    // The free list is empty here; make room for every slot to be freed.
    try_reserve(&mut self.free, self.slots.len() + 1)?;
    self.slots.push(Slot {
      generation: 0,
      value: Some(value),
    });
    self.len += 1;
    Ok(Handle { index, generation: 0 })
  }

  pub fn get(&self, handle: Handle) -> Option<&T> {
    self
      .slots
      .get(handle.index as usize)
      .filter(|slot| slot.generation == handle.generation)
      .and_then(|slot| slot.value.as_ref())
  }

  pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
    self
      .slots
      .get_mut(handle.index as usize)
      .filter(|slot| slot.generation == handle.generation)
      .and_then(|slot| slot.value.as_mut())
  }

  pub fn contains(&self, handle: Handle) -> bool {
    self.get(handle).is_some()
  }

  pub fn remove(&mut self, handle: Handle) -> Option<T> {
    let slot = self.slots.get_mut(handle.index as usize)?;
    if slot.generation != handle.generation {
      return None;
    }
    let value = slot.value.take()?;
    slot.generation = slot.generation.wrapping_add(1);
    // Never reallocates: insertion reserved room for every slot.
    self.free.push(handle.index);
    self.len -= 1;
    Some(value)
  }

  pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
    self.slots.iter().enumerate().filter_map(|(index, slot)| {
      slot.value.as_ref().map(|value| {
        (
          Handle {
            index: index as u32,
            generation: slot.generation,
          },
          value,
        )
      })
    })
  }

  pub fn handles(&self) -> Vec<Handle> {
    self.iter().map(|(handle, _)| handle).collect()
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }
}
