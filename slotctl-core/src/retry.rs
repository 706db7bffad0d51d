//! A small bounded-retry helper: wraps a nullary call, retries on any error
//! at a fixed delay, and re-raises the last error on exhaustion.
//!
//! Deliberately not a general retry framework — just the two knobs the
//! design calls for (attempt count, fixed backoff).
use std::thread;
use std::time::Duration;

pub fn retry<T, E>(attempts: usize, delay: Duration, mut f: impl FnMut() -> Result<T, E>) -> Result<T, E> {
    assert!(attempts > 0, "retry requires at least one attempt");
    let mut last_err = None;
    for attempt in 0..attempts {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < attempts {
                    thread::sleep(delay);
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn succeeds_immediately_without_sleeping() {
        let calls = Cell::new(0);
        let result: Result<i32, &str> = retry(3, Duration::from_millis(0), || {
            calls.set(calls.get() + 1);
            Ok(42)
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retries_until_success() {
        let calls = Cell::new(0);
        let result: Result<i32, &str> = retry(5, Duration::from_millis(0), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err("not yet") } else { Ok(7) }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhaustion_reraises_last_error() {
        let result: Result<i32, &str> = retry(3, Duration::from_millis(0), || Err("nope"));
        assert_eq!(result, Err("nope"));
    }
}
