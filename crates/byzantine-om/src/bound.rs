//! Traitor bound and message-count arithmetic for OM(m).
//!
//! OM(m) reaches agreement among `n` generals with `m` traitors only when:
//! - n > 3m
//!
//! The recursion is `m` levels deep, so a lieutenant receives one letter
//! per chain of distinct relays of length 0..=m that excludes itself and
//! the commander.

/// Default maximum recursion depth (largest `m` a run accepts).
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Largest number of traitors `n` generals can tolerate.
///
/// Formula: floor((n - 1) / 3)
///
/// # Examples
///
/// ```
/// use byzantine_om::max_traitors;
///
/// assert_eq!(max_traitors(3), 0);
/// assert_eq!(max_traitors(4), 1);
/// assert_eq!(max_traitors(7), 2);
/// ```
pub const fn max_traitors(generals: usize) -> usize {
    if generals == 0 {
        return 0;
    }
    (generals - 1) / 3
}

/// Check `n > 3m`.
pub const fn tolerates(generals: usize, traitors: usize) -> bool {
    generals > 3 * traitors
}

/// Ordered selections of `k` items out of `n`: n! / (n-k)!.
/// `None` on overflow.
const fn permutations(n: usize, k: usize) -> Option<usize> {
    if k > n {
        return Some(0);
    }
    let mut acc: usize = 1;
    let mut i = 0;
    while i < k {
        acc = match acc.checked_mul(n - i) {
            Some(v) => v,
            None => return None,
        };
        i += 1;
    }
    Some(acc)
}

/// Letters one lieutenant receives over a whole OM(m) run.
///
/// Sum over chain lengths 1..=m+1 of the relay orderings drawn from the
/// `n - 2` generals that are neither the commander nor the receiver.
/// Equals `n - 1` for m = 1. `None` when the count does not fit in a `usize`.
pub const fn letters_per_lieutenant(generals: usize, traitors: usize) -> Option<usize> {
    if generals < 2 {
        return Some(0);
    }
    let others = generals - 2;
    let mut total: usize = 0;
    let mut k = 0;
    while k <= traitors {
        let step = match permutations(others, k) {
            Some(v) => v,
            None => return None,
        };
        total = match total.checked_add(step) {
            Some(v) => v,
            None => return None,
        };
        k += 1;
    }
    Some(total)
}
