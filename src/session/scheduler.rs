// Gapless playback scheduling
//
// Each fragment starts at max(cursor, device clock) and the cursor then moves to
// the end of that fragment, so consecutive fragments play back-to-back in arrival
// order. Late fragments stall instead of overlapping.
//
// Scheduled fragments live in a small arena. A handle carries the generation of its
// slot, so a completion that races with an interruption (slot already freed, maybe
// reused) is recognised as stale and ignored.

use tracing::{debug, info, warn};

use crate::audio::{decode_fragment, AudioFragment, PlaybackDevice, PlaybackId};
use crate::error::LiveResult;

/// Cursor value of a fresh or reset timeline
pub const INITIAL_CURSOR: f64 = 0.0;

/// A fragment accepted by the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: PlaybackId,
    /// Start on the device clock (seconds)
    pub start: f64,
    pub duration: f64,
}

struct Slot {
    generation: u32,
    occupied: bool,
}

pub struct PlaybackScheduler {
    device: Box<dyn PlaybackDevice>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    active: usize,
    next_start_time: f64,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn PlaybackDevice>) -> Self {
        info!("Playback scheduler using {}", device.name());
        Self {
            device,
            slots: Vec::new(),
            free: Vec::new(),
            active: 0,
            next_start_time: INITIAL_CURSOR,
        }
    }

    /// Where the next fragment will start (before clamping to the device clock)
    pub fn cursor(&self) -> f64 {
        self.next_start_time
    }

    /// Number of scheduled, not yet finished fragments
    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn is_active(&self, id: PlaybackId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.occupied && slot.generation == id.generation)
    }

    pub fn device_time(&self) -> f64 {
        self.device.current_time()
    }

    /// Decode a base64 PCM16 fragment and schedule it
    ///
    /// A fragment that fails to decode is skipped; the cursor is left where it was.
    pub fn enqueue(&mut self, data: &str) -> LiveResult<Scheduled> {
        let fragment = decode_fragment(data, self.device.sample_rate())?;
        self.schedule(fragment)
    }

    /// Schedule a decoded fragment right after the previous one
    pub fn schedule(&mut self, fragment: AudioFragment) -> LiveResult<Scheduled> {
        let duration = fragment.duration_secs();
        let start = self.next_start_time.max(self.device.current_time());
        let id = self.allocate();

        if let Err(e) = self.device.start(id, fragment.samples, start) {
            warn!("Playback device refused fragment: {}", e);
            self.release(id);
            return Err(e);
        }

        self.next_start_time = start + duration;
        debug!(
            "Scheduled {:?} at {:.3}s for {:.3}s (cursor {:.3}s)",
            id, start, duration, self.next_start_time
        );

        Ok(Scheduled {
            id,
            start,
            duration,
        })
    }

    /// Natural completion reported by the device
    ///
    /// Returns false for stale handles (already stopped or recycled).
    pub fn complete(&mut self, id: PlaybackId) -> bool {
        if !self.is_active(id) {
            debug!("Ignoring stale completion for {:?}", id);
            return false;
        }
        self.release(id);
        true
    }

    /// Stop and forget every scheduled fragment, and rewind the cursor
    ///
    /// Returns how many fragments were stopped.
    pub fn interrupt(&mut self) -> usize {
        let mut stopped = 0;
        for index in 0..self.slots.len() {
            if !self.slots[index].occupied {
                continue;
            }
            let id = PlaybackId {
                index: index as u32,
                generation: self.slots[index].generation,
            };
            self.device.stop(id);
            self.release(id);
            stopped += 1;
        }
        self.next_start_time = INITIAL_CURSOR;
        stopped
    }

    /// Stop all playback and release the device
    pub fn close(&mut self) {
        let stopped = self.interrupt();
        self.device.close();
        info!("Playback closed ({} fragments stopped)", stopped);
    }

    fn allocate(&mut self) -> PlaybackId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    occupied: false,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.occupied = true;
        self.active += 1;

        PlaybackId {
            index,
            generation: slot.generation,
        }
    }

    fn release(&mut self, id: PlaybackId) {
        let slot = &mut self.slots[id.index as usize];
        if !slot.occupied || slot.generation != id.generation {
            return;
        }
        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.active -= 1;
    }
}
