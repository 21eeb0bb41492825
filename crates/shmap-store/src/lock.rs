//! Cross-process segment lock.
//!
//! The lock is a 64-bit word inside the mapping. Zero means free; a held
//! lock stores the owner token `(pid << 32) | thread_tag`. Acquisition is a
//! compare-and-swap with Acquire ordering and release stores zero with
//! Release ordering, so everything written under the lock is visible to the
//! next holder in any process.
//!
//! A holder that dies leaves its token behind. After the timeout elapses
//! the waiter checks whether the holder's pid still exists and takes the
//! lock over if it does not. A recycled pid defeats the check and turns
//! into a plain timeout.

use std::hint::spin_loop;
use std::process;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::region::process_alive;
use crate::{MapError, Result};

/// Spins before falling back to `yield_now`.
const SPIN_BEFORE_YIELD: u32 = 128;

static NEXT_THREAD_TAG: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_TAG: u32 = NEXT_THREAD_TAG.fetch_add(1, Ordering::Relaxed);
}

/// Token identifying the calling thread in this process.
pub fn owner_token() -> u64 {
    let tag = THREAD_TAG.with(|t| *t);
    (u64::from(process::id()) << 32) | u64::from(tag)
}

/// Process id recorded in a token.
pub const fn token_pid(token: u64) -> u32 {
    (token >> 32) as u32
}

/// Held segment lock; releases on drop.
pub struct LockGuard<'a> {
    word: &'a AtomicU64,
    token: u64,
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("token", &format_args!("{:#018x}", self.token))
            .finish_non_exhaustive()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self
            .word
            .compare_exchange(self.token, 0, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            warn!(
                token = self.token,
                "segment lock word changed while held; lock was taken over"
            );
        }
    }
}

fn backoff(spins: &mut u32) {
    if *spins < SPIN_BEFORE_YIELD {
        *spins += 1;
        spin_loop();
    } else {
        thread::yield_now();
    }
}

/// Acquire the lock stored in `word`.
///
/// Fails with [`MapError::LockTimeout`] if the lock is still held by a live
/// process after `timeout`, or immediately if the calling thread already
/// holds it.
pub fn acquire(word: &AtomicU64, segment: usize, timeout: Duration) -> Result<LockGuard<'_>> {
    let token = owner_token();
    let start = Instant::now();
    let mut spins = 0;

    loop {
        let current = match word.compare_exchange_weak(0, token, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => return Ok(LockGuard { word, token }),
            Err(current) => current,
        };

        if current == token {
            return Err(MapError::LockTimeout {
                segment,
                waited: start.elapsed(),
            });
        }

        if current != 0 && start.elapsed() >= timeout {
            let holder = token_pid(current);
            if process_alive(holder) {
                return Err(MapError::LockTimeout {
                    segment,
                    waited: start.elapsed(),
                });
            }
            if word
                .compare_exchange(current, token, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                warn!(
                    segment,
                    dead_pid = holder,
                    "took over segment lock held by exited process"
                );
                return Ok(LockGuard { word, token });
            }
            continue;
        }

        backoff(&mut spins);
    }
}
