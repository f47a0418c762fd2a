//! Completion signals built on runtime events.
//!
//! The kernel records the event whose id it finds in its argument buffer.
//! The host blocks on it with [`CompletionSignal::wait`], which also re-arms
//! the event so one signal serves every batch of a call.

use tracing::{debug, error, info, warn};

use super::stream::Stream;
use crate::error::{FvError, Result};
use crate::runtime::{DeviceRuntime, EventHandle};

pub struct CompletionSignal<'rt> {
    runtime: &'rt dyn DeviceRuntime,
    event: Option<EventHandle>,
    id: u32,
}

impl<'rt> CompletionSignal<'rt> {
    /// Allocate an event, fetch its id and arm it on `stream`.
    ///
    /// Failing to create the event or read its id is fatal. Failing to arm it
    /// is only logged; the signal is still returned.
    pub fn create(stream: &Stream<'rt>) -> Result<Self> {
        let runtime = stream.runtime();
        let event = runtime.create_event().map_err(|source| {
            error!(error = %source, "fail to create notify event");
            FvError::SyncFailure {
                what: "event create",
                source,
            }
        })?;

        let id = match runtime.event_id(event) {
            Ok(id) => id,
            Err(source) => {
                error!(error = %source, "fail to get notify event id");
                if let Err(e) = runtime.destroy_event(event) {
                    error!(error = %e, "event destroy failed");
                }
                return Err(FvError::SyncFailure {
                    what: "event id query",
                    source,
                });
            }
        };

        if let Err(e) = runtime.reset_event(event, stream.handle()) {
            warn!(signal_id = id, error = %e, "reset a event to stream failed");
        }

        info!(signal_id = id, "completion signal created");
        Ok(Self {
            runtime,
            event: Some(event),
            id,
        })
    }

    /// Id the kernel uses to record completion.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Block until the kernel records this signal, then re-arm it.
    pub fn wait(&self, stream: &Stream<'_>) -> Result<()> {
        let event = self.event.ok_or_else(|| FvError::SyncFailure {
            what: "signal wait",
            source: crate::runtime::RuntimeError::new("destroyed signal", -1),
        })?;

        self.runtime
            .stream_wait_event(stream.handle(), event)
            .map_err(|source| {
                error!(signal_id = self.id, error = %source, "wait for a event to stream failed");
                FvError::SyncFailure {
                    what: "event wait",
                    source,
                }
            })?;

        self.runtime
            .reset_event(event, stream.handle())
            .map_err(|source| {
                error!(signal_id = self.id, error = %source, "reset a event to stream failed");
                FvError::SyncFailure {
                    what: "event reset",
                    source,
                }
            })?;

        debug!(signal_id = self.id, "completion observed");
        Ok(())
    }

    /// Release the underlying event. Later calls are no-ops.
    pub fn destroy(&mut self) {
        if let Some(event) = self.event.take() {
            if let Err(e) = self.runtime.destroy_event(event) {
                error!(signal_id = self.id, error = %e, "event destroy failed");
            }
        }
    }
}

impl Drop for CompletionSignal<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sim::SimRuntime;

    #[test]
    fn test_destroy_is_idempotent() {
        let sim = SimRuntime::new();
        let stream = Stream::create(&sim).unwrap();
        let mut signal = CompletionSignal::create(&stream).unwrap();
        assert!(signal.id() > 0);
        signal.destroy();
        signal.destroy();
        drop(signal);
        assert_eq!(sim.stats().events_destroyed, 1);
        assert_eq!(sim.live_events(), 0);
    }

    #[test]
    fn test_wait_without_completion_fails() {
        let sim = SimRuntime::new();
        let stream = Stream::create(&sim).unwrap();
        let signal = CompletionSignal::create(&stream).unwrap();
        let err = signal.wait(&stream).unwrap_err();
        assert!(matches!(err, FvError::SyncFailure { what: "event wait", .. }));
    }

    #[test]
    fn test_wait_after_destroy_fails() {
        let sim = SimRuntime::new();
        let stream = Stream::create(&sim).unwrap();
        let mut signal = CompletionSignal::create(&stream).unwrap();
        signal.destroy();
        let err = signal.wait(&stream).unwrap_err();
        assert!(matches!(err, FvError::SyncFailure { what: "signal wait", .. }));
    }

    #[test]
    fn test_create_failure_is_fatal() {
        let sim = SimRuntime::new();
        sim.fail_event_create_at(1);
        let stream = Stream::create(&sim).unwrap();
        assert!(CompletionSignal::create(&stream).is_err());
    }
}
