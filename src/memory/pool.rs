// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Named buffer pool.
//!
//! Every processing stage keeps its working array in a pool slot named after
//! the array's role (`radios`, `sinos`, `recs`, ...). A slot holds at most one
//! live buffer; re-acquiring it with a different shape frees the old buffer
//! first. Releasing a slot swaps the data for a one-element placeholder so
//! the name stays registered and can be re-acquired cheaply.
//!
//! A `Device` pool enforces its byte capacity and accounts for every byte
//! crossing the host/device boundary. A `Host` pool is unbounded unless given
//! a capacity and takes ownership of stored arrays without copying.

use std::ops::Range;

use ndarray::{s, Array3, ArrayView3, ArrayViewMut3};

use crate::config::consts::BYTES_PER_ELEMENT;
use crate::errors::ReconError;
use crate::observability::messages::{memory::BufferAllocated, StructuredLog};

pub const RADIOS: &str = "radios";
pub const SINOS: &str = "sinos";
pub const RECS: &str = "recs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Host,
    Device,
}

impl PoolKind {
    pub fn name(self) -> &'static str {
        match self {
            PoolKind::Host => "host",
            PoolKind::Device => "device",
        }
    }
}

/// Allocation and transfer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocations: usize,
    pub releases: usize,
    pub peak_bytes: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

#[derive(Debug)]
struct Slot {
    name: String,
    data: Array3<f32>,
    live: bool,
}

impl Slot {
    fn bytes(&self) -> u64 {
        if self.live {
            array_bytes(self.data.len())
        } else {
            0
        }
    }
}

fn array_bytes(len: usize) -> u64 {
    len as u64 * BYTES_PER_ELEMENT
}

#[derive(Debug)]
pub struct BufferPool {
    kind: PoolKind,
    capacity_bytes: u64,
    used_bytes: u64,
    slots: Vec<Slot>,
    stats: PoolStats,
}

impl BufferPool {
    pub fn host() -> Self {
        Self::with_capacity(PoolKind::Host, u64::MAX)
    }

    pub fn device(capacity_bytes: u64) -> Self {
        Self::with_capacity(PoolKind::Device, capacity_bytes)
    }

    pub fn with_capacity(kind: PoolKind, capacity_bytes: u64) -> Self {
        Self {
            kind,
            capacity_bytes,
            used_bytes: 0,
            slots: Vec::new(),
            stats: PoolStats::default(),
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    fn live_position(&self, name: &str) -> Result<usize, ReconError> {
        self.position(name)
            .filter(|&i| self.slots[i].live)
            .ok_or_else(|| ReconError::BufferNotFound(name.to_string()))
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.position(name).is_some_and(|i| self.slots[i].live)
    }

    pub fn shape(&self, name: &str) -> Option<[usize; 3]> {
        self.position(name)
            .filter(|&i| self.slots[i].live)
            .map(|i| {
                let (a, b, c) = self.slots[i].data.dim();
                [a, b, c]
            })
    }

    /// Names of live buffers, in registration order.
    pub fn live_names(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|s| s.live)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Frees the slot if live and reserves room for `bytes` more.
    fn make_room(&mut self, name: &str, bytes: u64) -> Result<usize, ReconError> {
        if let Some(i) = self.position(name) {
            if self.slots[i].live {
                self.used_bytes -= self.slots[i].bytes();
                self.slots[i].data = placeholder();
                self.slots[i].live = false;
            }
        }
        if self.used_bytes.saturating_add(bytes) > self.capacity_bytes {
            return Err(ReconError::OutOfMemory {
                pool: self.kind.name(),
                buffer: name.to_string(),
                requested_bytes: bytes,
                used_bytes: self.used_bytes,
                capacity_bytes: self.capacity_bytes,
            });
        }
        let index = match self.position(name) {
            Some(i) => i,
            None => {
                self.slots.push(Slot {
                    name: name.to_string(),
                    data: placeholder(),
                    live: false,
                });
                self.slots.len() - 1
            }
        };
        self.used_bytes += bytes;
        self.stats.allocations += 1;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.used_bytes);
        BufferAllocated {
            pool: self.kind.name(),
            buffer: name,
            bytes,
            used_bytes: self.used_bytes,
        }
        .log();
        Ok(index)
    }

    /// Returns the buffer `name` with the given shape, allocating (zeroed) if
    /// it is absent, released, or of a different shape.
    pub fn acquire(&mut self, name: &str, shape: [usize; 3]) -> Result<&mut Array3<f32>, ReconError> {
        if self.shape(name) != Some(shape) {
            let bytes = array_bytes(shape.iter().product());
            let index = self.make_room(name, bytes)?;
            let slot = &mut self.slots[index];
            slot.data = Array3::zeros((shape[0], shape[1], shape[2]));
            slot.live = true;
        }
        let index = self.live_position(name)?;
        Ok(&mut self.slots[index].data)
    }

    /// Puts `data` under `name`. A device pool counts the bytes as uploaded.
    pub fn store(&mut self, name: &str, data: Array3<f32>) -> Result<(), ReconError> {
        let bytes = array_bytes(data.len());
        let index = self.make_room(name, bytes)?;
        let slot = &mut self.slots[index];
        slot.data = data;
        slot.live = true;
        if self.kind == PoolKind::Device {
            self.stats.bytes_uploaded += bytes;
        }
        Ok(())
    }

    /// Copies `data` into the buffer `name`, reusing it when the shape matches.
    pub fn upload(&mut self, name: &str, data: ArrayView3<f32>) -> Result<(), ReconError> {
        let (a, b, c) = data.dim();
        let bytes = array_bytes(data.len());
        self.acquire(name, [a, b, c])?.assign(&data);
        if self.kind == PoolKind::Device {
            self.stats.bytes_uploaded += bytes;
        }
        Ok(())
    }

    /// Copy of the buffer `name`. A device pool counts the bytes as downloaded.
    pub fn fetch(&mut self, name: &str) -> Result<Array3<f32>, ReconError> {
        let index = self.live_position(name)?;
        let data = self.slots[index].data.clone();
        if self.kind == PoolKind::Device {
            self.stats.bytes_downloaded += array_bytes(data.len());
        }
        Ok(data)
    }

    /// Moves the buffer out of the pool, leaving a placeholder.
    pub fn take(&mut self, name: &str) -> Result<Array3<f32>, ReconError> {
        let index = self.live_position(name)?;
        let bytes = self.slots[index].bytes();
        let data = std::mem::replace(&mut self.slots[index].data, placeholder());
        self.slots[index].live = false;
        self.used_bytes -= bytes;
        self.stats.releases += 1;
        if self.kind == PoolKind::Device {
            self.stats.bytes_downloaded += bytes;
        }
        Ok(data)
    }

    /// Keeps only `rows` along the second axis of buffer `name`.
    pub fn crop_rows(&mut self, name: &str, rows: Range<usize>) -> Result<(), ReconError> {
        let index = self.live_position(name)?;
        let cropped = self.slots[index].data.slice(s![.., rows, ..]).to_owned();
        let index = self.make_room(name, array_bytes(cropped.len()))?;
        let slot = &mut self.slots[index];
        slot.data = cropped;
        slot.live = true;
        Ok(())
    }

    pub fn view(&self, name: &str) -> Result<ArrayView3<'_, f32>, ReconError> {
        let index = self.live_position(name)?;
        Ok(self.slots[index].data.view())
    }

    pub fn view_mut(&mut self, name: &str) -> Result<ArrayViewMut3<'_, f32>, ReconError> {
        let index = self.live_position(name)?;
        Ok(self.slots[index].data.view_mut())
    }

    /// Simultaneous read access to `src` and write access to `dst`.
    pub fn pair_mut(
        &mut self,
        src: &str,
        dst: &str,
    ) -> Result<(ArrayView3<'_, f32>, ArrayViewMut3<'_, f32>), ReconError> {
        let i = self.live_position(src)?;
        let j = self.live_position(dst)?;
        if i == j {
            return Err(ReconError::BufferNotFound(format!(
                "'{}' cannot be both source and destination",
                src
            )));
        }
        if i < j {
            let (left, right) = self.slots.split_at_mut(j);
            Ok((left[i].data.view(), right[0].data.view_mut()))
        } else {
            let (left, right) = self.slots.split_at_mut(i);
            Ok((right[0].data.view(), left[j].data.view_mut()))
        }
    }

    /// Frees the buffer `name`, keeping a one-element placeholder. Returns the
    /// number of bytes freed.
    pub fn release(&mut self, name: &str) -> u64 {
        let Some(index) = self.position(name) else {
            return 0;
        };
        let slot = &mut self.slots[index];
        if !slot.live {
            return 0;
        }
        let bytes = slot.bytes();
        slot.data = placeholder();
        slot.live = false;
        self.used_bytes -= bytes;
        self.stats.releases += 1;
        bytes
    }

    /// Frees every live buffer. Returns `(buffers, bytes)` freed.
    pub fn release_all(&mut self) -> (usize, u64) {
        let names: Vec<String> = self
            .slots
            .iter()
            .filter(|s| s.live)
            .map(|s| s.name.clone())
            .collect();
        let bytes = names.iter().map(|n| self.release(n)).sum();
        (names.len(), bytes)
    }
}

fn placeholder() -> Array3<f32> {
    Array3::zeros((1, 1, 1))
}
