use crate::{AtomicTreasury, CoinStatus, Error, LockTreasury, ManualClock, TimeSource, Treasury};
use core::time::Duration;
use std::sync::{Arc, Barrier, Mutex};
use std::thread::scope;

const INTERVAL: Duration = Duration::from_millis(5_000);

trait CoinStatusExt {
    fn unwrap_granted(self) -> u64;
    fn unwrap_denied(self) -> u64;
}

impl CoinStatusExt for CoinStatus {
    fn unwrap_granted(self) -> u64 {
        match self {
            CoinStatus::Granted { at } => at,
            CoinStatus::Denied { retry_in } => {
                panic!("expected a grant, was denied (retry in {retry_in}ms)")
            }
        }
    }

    fn unwrap_denied(self) -> u64 {
        match self {
            CoinStatus::Denied { retry_in } => retry_in,
            CoinStatus::Granted { at } => panic!("expected a denial, was granted at {at}"),
        }
    }
}

fn run_first_request_is_granted<R>(clock: ManualClock)
where
    R: Treasury<ManualClock>,
{
    let treasury = R::new(INTERVAL, clock);
    assert_eq!(treasury.min_interval(), INTERVAL);
    assert_eq!(treasury.last_grant(), None);
    let at = treasury.poll_coin().unwrap_granted();
    assert_eq!(at, 1_000);
    assert_eq!(treasury.last_grant(), Some(1_000));
}

fn run_denies_until_interval_elapses<R>(clock: ManualClock)
where
    R: Treasury<ManualClock>,
{
    let treasury = R::new(INTERVAL, clock.clone());
    treasury.poll_coin().unwrap_granted();

    clock.advance(Duration::from_millis(1_500));
    assert_eq!(treasury.poll_coin().unwrap_denied(), 3_500);

    clock.advance(Duration::from_millis(3_499));
    assert_eq!(treasury.poll_coin().unwrap_denied(), 1);

    // Exactly `min_interval` after the previous grant is enough.
    clock.advance(Duration::from_millis(1));
    assert_eq!(treasury.poll_coin().unwrap_granted(), 6_000);
}

fn run_grants_are_spaced_by_interval<R>(clock: ManualClock)
where
    R: Treasury<ManualClock>,
{
    let treasury = R::new(INTERVAL, clock.clone());
    let mut grants = Vec::new();

    // Poll every 700ms for a while; only some polls can win.
    for _ in 0..200 {
        if let CoinStatus::Granted { at } = treasury.poll_coin() {
            grants.push(at);
        }
        clock.advance(Duration::from_millis(700));
    }

    assert!(grants.len() > 1);
    for pair in grants.windows(2) {
        assert!(pair[1] - pair[0] >= INTERVAL.as_millis() as u64);
    }
}

fn run_exactly_one_concurrent_winner<R>(clock: ManualClock)
where
    R: Treasury<ManualClock>,
{
    let threads = num_cpus::get().max(8);
    let treasury = R::new(INTERVAL, clock);
    let barrier = Barrier::new(threads);
    let outcomes = Mutex::new(Vec::with_capacity(threads));

    scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                barrier.wait();
                let status = treasury.poll_coin();
                outcomes.lock().unwrap().push(status);
            });
        }
    });

    let outcomes = outcomes.into_inner().unwrap();
    let granted = outcomes.iter().filter(|s| s.is_granted()).count();
    assert_eq!(outcomes.len(), threads);
    assert_eq!(granted, 1, "the clock never moved, so only one coin may exist");
}

fn run_rejects_empty_identity<R>(clock: ManualClock)
where
    R: Treasury<ManualClock>,
{
    let treasury = R::new(INTERVAL, clock);
    let err = treasury.request_coin("  ").unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
    // The rejected request must not have consumed the coin.
    assert_eq!(treasury.last_grant(), None);
    assert!(treasury.request_coin("worker-a").unwrap().is_granted());
    assert!(!treasury.request_coin("worker-b").unwrap().is_granted());
}

#[test]
fn atomic_first_request_is_granted() {
    run_first_request_is_granted::<AtomicTreasury<_>>(ManualClock::new(1_000));
}

#[test]
fn lock_first_request_is_granted() {
    run_first_request_is_granted::<LockTreasury<_>>(ManualClock::new(1_000));
}

#[test]
fn atomic_denies_until_interval_elapses() {
    run_denies_until_interval_elapses::<AtomicTreasury<_>>(ManualClock::new(1_000));
}

#[test]
fn lock_denies_until_interval_elapses() {
    run_denies_until_interval_elapses::<LockTreasury<_>>(ManualClock::new(1_000));
}

#[test]
fn atomic_grants_are_spaced_by_interval() {
    run_grants_are_spaced_by_interval::<AtomicTreasury<_>>(ManualClock::new(0));
}

#[test]
fn lock_grants_are_spaced_by_interval() {
    run_grants_are_spaced_by_interval::<LockTreasury<_>>(ManualClock::new(0));
}

#[test]
fn atomic_exactly_one_concurrent_winner() {
    run_exactly_one_concurrent_winner::<AtomicTreasury<_>>(ManualClock::new(42));
}

#[test]
fn lock_exactly_one_concurrent_winner() {
    run_exactly_one_concurrent_winner::<LockTreasury<_>>(ManualClock::new(42));
}

#[test]
fn atomic_rejects_empty_identity() {
    run_rejects_empty_identity::<AtomicTreasury<_>>(ManualClock::new(7));
}

#[test]
fn lock_rejects_empty_identity() {
    run_rejects_empty_identity::<LockTreasury<_>>(ManualClock::new(7));
}

#[test]
fn grant_spacing_holds_under_contention_with_moving_clock() {
    const THREADS: usize = 8;
    const POLLS: usize = 2_000;

    let clock = ManualClock::new(0);
    let treasury = Arc::new(AtomicTreasury::new(Duration::from_millis(10), clock.clone()));
    let grants = Mutex::new(Vec::new());

    scope(|s| {
        for _ in 0..THREADS {
            let treasury = Arc::clone(&treasury);
            let clock = clock.clone();
            let grants = &grants;
            s.spawn(move || {
                for _ in 0..POLLS {
                    clock.advance(Duration::from_millis(1));
                    let before = clock.current_millis();
                    if let CoinStatus::Granted { at } = treasury.poll_coin() {
                        // The stamp is taken after the call began, never earlier.
                        assert!(at >= before, "granted at {at}, call began at {before}");
                        grants.lock().unwrap().push(at);
                    }
                }
            });
        }
    });

    let mut grants = grants.into_inner().unwrap();
    grants.sort_unstable();
    assert!(!grants.is_empty());
    assert_eq!(treasury.last_grant(), grants.last().copied());
    for pair in grants.windows(2) {
        assert!(pair[1] - pair[0] >= 10, "grants {pair:?} are too close");
    }
    assert!(clock.current_millis() >= (THREADS * POLLS) as u64);
}
