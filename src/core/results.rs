//! Result channel and the iterator that drains it.

use std::iter::FusedIterator;
use std::sync::atomic::Ordering;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::core::pool::Shared;

/// Consecutive quiet, empty reads before the iterator concludes.
const QUIET_ROUNDS: u8 = 2;

/// Unbounded FIFO of values waiting for the iterator.
pub(crate) struct ResultChannel<R> {
    tx: Sender<R>,
    rx: Receiver<R>,
}

impl<R> ResultChannel<R> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, value: R) {
        // Both ends live as long as the channel, so the send cannot fail.
        let _ = self.tx.send(value);
    }

    pub fn receiver(&self) -> Receiver<R> {
        self.rx.clone()
    }
}

/// Values of finished tasks in completion order.
///
/// Obtained from [`TagPool::iter`](crate::core::TagPool::iter). Ends when the
/// pool is quiescent on two consecutive empty reads, or as soon as the pool
/// stops. Once ended it stays ended.
pub struct ResultIter<'a, R> {
    shared: &'a Shared<R>,
    rx: Receiver<R>,
    quiet_rounds: u8,
    finished: bool,
}

impl<'a, R> ResultIter<'a, R> {
    pub(crate) const fn new(shared: &'a Shared<R>, rx: Receiver<R>) -> Self {
        Self {
            shared,
            rx,
            quiet_rounds: 0,
            finished: false,
        }
    }

    fn finish(&mut self) -> Option<R> {
        self.finished = true;
        None
    }
}

impl<R> Iterator for ResultIter<'_, R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        let wait = self.shared.intervals.iterator();
        loop {
            if self.finished {
                return None;
            }
            if self.shared.lifecycle.is_stopping() || self.shared.lifecycle.is_faulted() {
                debug!("result iterator ended by stop");
                return self.finish();
            }
            if self.shared.callback.read().is_some() {
                warn!("pool-wide callback set during iteration; ending iterator");
                return self.finish();
            }

            match self.rx.recv_timeout(wait) {
                Ok(value) => {
                    self.quiet_rounds = 0;
                    return Some(value);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.is_quiescent() {
                        self.quiet_rounds += 1;
                        if self.quiet_rounds >= QUIET_ROUNDS {
                            debug!(
                                delivered = self.shared.counters.completed.load(Ordering::Relaxed),
                                "result iterator drained"
                            );
                            return self.finish();
                        }
                    } else {
                        self.quiet_rounds = 0;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return self.finish(),
            }
        }
    }
}

impl<R> FusedIterator for ResultIter<'_, R> {}

impl<R> std::fmt::Debug for ResultIter<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultIter")
            .field("queued", &self.rx.len())
            .field("quiet_rounds", &self.quiet_rounds)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_is_fifo() {
        let channel = ResultChannel::new();
        channel.push(1);
        channel.push(2);
        let rx = channel.receiver();
        assert_eq!(rx.try_recv().ok(), Some(1));
        assert_eq!(rx.try_recv().ok(), Some(2));
        assert!(rx.try_recv().is_err());
    }
}
