use crossbeam_channel::{Sender, TrySendError};
use log::debug;

use crate::error::AvatarError;
use std::rc::Rc;

/// Lifecycle events of a playable audio resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Play,
    Pause,
    Ended,
}

/// Deregistration token handed out by [`AudioSource::subscribe`].
///
/// Unsubscribing with a handle is effective exactly once; a second call
/// with the same handle is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

/// Read access to the time-domain signal at the current playhead.
///
/// The analyzer pulls one window per snapshot through this seam; any source
/// that can hand out recent samples is connectable.
pub trait AudioTap {
    /// Sample rate of the underlying signal. A rate of zero marks the tap
    /// as unusable and keeps the analyzer non-ready.
    fn sample_rate(&self) -> u32;

    /// Copy the most recent samples up to the playhead into `out`, newest
    /// sample last, zero-padding the front when fewer are available.
    /// Returns the number of real (non-padding) samples written.
    fn fill_window(&self, out: &mut [f32]) -> usize;
}

/// The playable-resource contract the lip-sync pipeline binds to.
///
/// Anything exposing play/pause/ended events plus a frequency-analysis tap
/// satisfies it; [`crate::audio::WavPlayback`] is the shipped rodio-backed
/// implementation and tests use in-memory mocks.
pub trait AudioSource {
    /// Register a listener for playback events. Events are delivered over
    /// the given channel sender; a disconnected receiver drops the listener.
    fn subscribe(&mut self, sender: Sender<PlaybackEvent>) -> ListenerHandle;

    /// Remove a previously registered listener. Idempotent.
    fn unsubscribe(&mut self, handle: ListenerHandle);

    /// Acquire the analysis tap, or `None` when the source has no signal
    /// to analyze (nothing loaded, zero-rate stream).
    fn tap(&self) -> Option<Rc<dyn AudioTap>>;

    /// Wake a suspended audio context. Attempted opportunistically at bind
    /// time; failure is reported, never thrown into the frame path.
    fn resume(&mut self) -> Result<(), AvatarError>;

    /// Cooperative event pump, called once per tick. Detects conditions the
    /// backend reports only by polling (end of playback).
    fn poll(&mut self);
}

/// Listener bookkeeping shared by source implementations.
///
/// Holds one channel sender per subscription and prunes listeners whose
/// receiving side has gone away.
pub struct ListenerRegistry {
    listeners: Vec<(u64, Sender<PlaybackEvent>)>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    pub fn subscribe(&mut self, sender: Sender<PlaybackEvent>) -> ListenerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, sender));
        ListenerHandle(id)
    }

    pub fn unsubscribe(&mut self, handle: ListenerHandle) {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != handle.0);
        if self.listeners.len() == before {
            debug!("unsubscribe with stale listener handle {:?}", handle);
        }
    }

    /// Fan an event out to every live listener. A full channel drops the
    /// event for that listener (frame-rate consumers catch up next tick);
    /// a disconnected channel drops the listener.
    pub fn emit(&mut self, event: PlaybackEvent) {
        self.listeners.retain(|(_, sender)| match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
