// tests/rate_window.rs

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rthrottle::{ChannelRatePolicy, MultiRatePolicy, Rate, ThrottleError, ThrottlePolicy};
use std::collections::HashMap;
mod common; // Import common helpers

use common::{as_clock, manual_clock, max_in_any_window, rate};

const CALLS_PER_RUN: usize = 300;

#[test]
fn test_rate_concrete_scenario() {
  let mut r = rate(2, 1000);
  let mut admitted = Vec::new();
  for now in [0u64, 100, 150] {
    let t = r.call_time(now);
    r.add_call(t);
    admitted.push(t);
  }
  assert_eq!(admitted, vec![0, 100, 1001]);
}

#[test]
fn test_rate_window_ceiling_random_patterns() {
  common::setup_tracing();
  for seed in 0..50u64 {
    let mut rng = StdRng::seed_from_u64(seed);
    let number_calls: usize = rng.random_range(1..=5);
    let window_ms = [100u64, 250, 1000][rng.random_range(0..3usize)];
    let mut r = rate(number_calls, window_ms);

    let mut now = 0u64;
    let mut admitted = Vec::with_capacity(CALLS_PER_RUN);
    for _ in 0..CALLS_PER_RUN {
      now += rng.random_range(0..300u64);
      let t = r.call_time(now);
      assert!(t >= now);
      r.add_call(t);
      admitted.push(t);
    }
    let worst = max_in_any_window(&admitted, window_ms);
    assert!(
      worst <= number_calls,
      "seed {}: {} calls in one {}ms window, limit {}",
      seed,
      worst,
      window_ms,
      number_calls
    );
  }
}

#[test]
fn test_rate_admits_immediately_under_capacity() {
  let mut rng = StdRng::seed_from_u64(7);
  let mut r = rate(4, 1000);
  let mut now = 0u64;
  for _ in 0..100 {
    // Gaps of at least 334ms leave two earlier calls in any trailing second.
    now += rng.random_range(334..600u64);
    assert_eq!(r.call_time(now), now);
    r.add_call(now);
  }
}

#[test]
fn test_composed_policies_respect_every_rate() -> Result<(), ThrottleError> {
  common::setup_tracing();
  for seed in 0..50u64 {
    let mut rng = StdRng::seed_from_u64(seed);
    let global_specs: [(usize, u64); 2] = [
      (rng.random_range(1..=4), [100u64, 250, 1000][rng.random_range(0..3usize)]),
      (rng.random_range(3..=8), [1000u64, 3000][rng.random_range(0..2usize)]),
    ];
    let channel_specs: Vec<(usize, u64)> = (0..2)
      .map(|_| (rng.random_range(1..=3), [200u64, 500, 2000][rng.random_range(0..3usize)]))
      .collect();

    let clock = manual_clock();
    let globals: Vec<Rate> = global_specs.iter().map(|&(n, w)| rate(n, w)).collect();
    let channels: HashMap<u8, Rate> = channel_specs
      .iter()
      .enumerate()
      .map(|(key, &(n, w))| (key as u8, rate(n, w)))
      .collect();
    let policy = MultiRatePolicy::new(globals, channels, as_clock(&clock))?;

    let mut all = Vec::new();
    let mut per_channel: HashMap<u8, Vec<u64>> = HashMap::new();
    let mut now = 0u64;
    for _ in 0..CALLS_PER_RUN {
      now += rng.random_range(0..300u64);
      clock.set(now);
      let channel = match rng.random_range(0..3u8) {
        2 => None,
        key => Some(key),
      };
      let admission = policy.admit(channel.as_ref());
      assert_eq!(admission.now, now);
      assert!(admission.at >= now);
      all.push(admission.at);
      if let Some(key) = channel {
        per_channel.entry(key).or_default().push(admission.at);
      }
    }

    for &(n, w) in &global_specs {
      assert!(max_in_any_window(&all, w) <= n, "seed {}: global {}/{}ms exceeded", seed, n, w);
    }
    for (key, timestamps) in &per_channel {
      let (n, w) = channel_specs[*key as usize];
      assert!(max_in_any_window(timestamps, w) <= n, "seed {}: channel {} {}/{}ms exceeded", seed, key, n, w);
    }
  }
  Ok(())
}

#[test]
fn test_channel_policy_shared_across_threads() {
  common::setup_tracing();
  let clock = manual_clock();
  let policy = std::sync::Arc::new(ChannelRatePolicy::new(
    rate(5, 1000),
    HashMap::from([("a", rate(2, 1000)), ("b", rate(2, 1000))]),
    as_clock(&clock),
  ));

  let workers: Vec<_> = ["a", "b"]
    .into_iter()
    .map(|key| {
      let policy = policy.clone();
      std::thread::spawn(move || (0..10).map(|_| policy.admit(Some(&key)).at).collect::<Vec<u64>>())
    })
    .collect();
  let mut all = Vec::new();
  for (key, worker) in ["a", "b"].into_iter().zip(workers) {
    let admitted = worker.join().expect("worker panicked");
    assert!(max_in_any_window(&admitted, 1000) <= 2, "channel {} exceeded its rate", key);
    all.extend(admitted);
  }
  assert!(max_in_any_window(&all, 1000) <= 5);
}
