use std::{iter::Take, time::Duration};

/// An infinite stream of back off durations, where the duration increases by
/// an exponential factor up to some maximum delay. Upon reaching the maximum
/// delay, that value will be returned from then on.
///
/// Used only while a transport is establishing its connections: peers may
/// not be listening yet. Failures on an established link are not retried.
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let this = self.curr;
        self.curr = (self.curr * self.factor).min(self.max);
        Some(this)
    }
}

/// Retry a fallible operation over an iterator of delays, until it either
/// succeeds or the iterator is exhausted.
pub trait Retry: Iterator<Item = Duration> + Sized {
    /// Retry `f` until it returns [Ok]. On an error, `sleep` is called with
    /// the error and the delay before the next attempt (it is not called after
    /// the last attempt). If every attempt fails the last [Err] is returned;
    /// `None` means the iterator was empty and nothing was attempted.
    fn retry<F, S, T, E>(self, mut f: F, sleep: S) -> Option<Result<T, E>>
    where
        F: FnMut() -> Result<T, E>,
        S: Fn(&E, Duration),
    {
        let mut last_err = None;
        let mut iter = self.peekable();

        while let Some(delay) = iter.next() {
            match f() {
                Ok(v) => return Some(Ok(v)),
                Err(e) => {
                    if iter.peek().is_some() {
                        sleep(&e, delay);
                    }
                    last_err = Some(Err(e));
                }
            }
        }
        last_err
    }
}

impl Retry for ExponentialBackoff {}

impl Retry for Take<ExponentialBackoff> {}
