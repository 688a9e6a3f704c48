use log::debug;
use std::cell::Cell;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

/// Cancellation token for a [`FrameLoop`].
///
/// The loop checks the flag at the top of every tick, before touching any
/// resource, so cancellation is effective even if the scheduling source
/// would have delivered one more callback.
#[derive(Clone)]
pub struct CancelHandle {
    live: Rc<Cell<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if self.live.replace(false) {
            debug!("frame loop cancelled");
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.get()
    }
}

/// Cooperative fixed-cadence tick driver.
///
/// Single-threaded: the callback runs on the caller's thread once per frame
/// interval, receiving a monotonic timestamp in milliseconds. The callback
/// returns [`ControlFlow::Break`] to stop, or the loop ends when its
/// [`CancelHandle`] fires.
pub struct FrameLoop {
    live: Rc<Cell<bool>>,
    frame_interval: Duration,
}

impl FrameLoop {
    pub fn new(target_fps: u32) -> Self {
        let fps = target_fps.max(1);
        Self {
            live: Rc::new(Cell::new(true)),
            frame_interval: Duration::from_secs_f64(1.0 / fps as f64),
        }
    }

    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            live: Rc::clone(&self.live),
        }
    }

    /// Run until cancelled or the callback breaks. Sleeps away the frame
    /// remainder; a slow callback just lowers the effective rate.
    pub fn run<F>(self, mut tick: F)
    where
        F: FnMut(f64) -> ControlFlow<()>,
    {
        let start = Instant::now();
        loop {
            if !self.live.get() {
                break;
            }

            let now_ms = start.elapsed().as_secs_f64() * 1000.0;
            let tick_started = Instant::now();
            if tick(now_ms).is_break() {
                break;
            }

            let spent = tick_started.elapsed();
            if spent < self.frame_interval {
                thread::sleep(self.frame_interval - spent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_break_stops_loop() {
        let frame_loop = FrameLoop::new(1000);
        let mut ticks = 0;
        frame_loop.run(|_| {
            ticks += 1;
            if ticks >= 5 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(ticks, 5);
    }

    #[test]
    fn test_cancel_before_run_delivers_no_ticks() {
        let frame_loop = FrameLoop::new(1000);
        frame_loop.handle().cancel();

        let mut ticks = 0;
        frame_loop.run(|_| {
            ticks += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(ticks, 0);
    }

    #[test]
    fn test_cancel_from_within_callback() {
        let frame_loop = FrameLoop::new(1000);
        let handle = frame_loop.handle();

        let mut ticks = 0;
        frame_loop.run(|_| {
            ticks += 1;
            if ticks == 3 {
                handle.cancel();
            }
            ControlFlow::Continue(())
        });
        // The tick that cancelled still completed; no further ticks ran.
        assert_eq!(ticks, 3);
        assert!(!handle.is_live());
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let frame_loop = FrameLoop::new(1000);
        let mut last = -1.0;
        let mut ticks = 0;
        frame_loop.run(|now_ms| {
            assert!(now_ms >= last);
            last = now_ms;
            ticks += 1;
            if ticks >= 10 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
    }
}
