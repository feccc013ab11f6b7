// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./reservoir_test.rs"]
mod reservoir_test;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro128StarStar;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

pub const DEFAULT_RESERVOIR_SIZE: usize = 1028;
pub const DEFAULT_ALPHA: f64 = 0.015;

// With alpha=0.015 the priority exponent grows by 54 per hour of landmark
// age; rescaling hourly keeps it far away from f64 overflow (exp caps out
// near 709).
const RESCALE_INTERVAL: Duration = Duration::from_secs(60 * 60);

//
// WeightedSample
//

#[derive(Clone, Copy, Debug)]
struct WeightedSample {
  value: f64,
  priority: f64,
}

// Heap order is inverted so that the root is the lowest priority sample, i.e.
// the eviction candidate.
impl Ord for WeightedSample {
  fn cmp(&self, other: &Self) -> Ordering {
    other.priority.total_cmp(&self.priority)
  }
}

impl PartialOrd for WeightedSample {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for WeightedSample {
  fn eq(&self, other: &Self) -> bool {
    self.priority == other.priority
  }
}

impl Eq for WeightedSample {}

//
// DecayingReservoir
//

// A forward-decaying priority reservoir (Cormode, Shkapenyuk, Srivastava,
// Xu). Each insert draws priority exp(alpha * (t - t0)) * rand(); the
// reservoir keeps the top `size` priorities, so recent samples dominate:
// with the default parameters roughly the last five minutes of traffic.
pub struct DecayingReservoir {
  size: usize,
  alpha: f64,
  landmark: Instant,
  last_rescale: Instant,
  samples: BinaryHeap<WeightedSample>,
}

impl DecayingReservoir {
  #[must_use]
  pub fn new(size: usize, alpha: f64) -> Self {
    let now = Instant::now();
    Self {
      size,
      alpha,
      landmark: now,
      last_rescale: now,
      samples: BinaryHeap::with_capacity(size + 1),
    }
  }

  pub fn insert(&mut self, value: f64) {
    self.insert_at(value, Instant::now());
  }

  pub(crate) fn insert_at(&mut self, value: f64, now: Instant) {
    thread_local! {
      // Fast non crypto rng.
      static RANDOM: RefCell<Xoshiro128StarStar> =
        RefCell::new(Xoshiro128StarStar::from_entropy());
    }

    if now.duration_since(self.last_rescale) >= RESCALE_INTERVAL {
      self.rescale(now);
    }

    let elapsed = now.duration_since(self.landmark).as_secs_f64();
    let priority = (self.alpha * elapsed).exp() * RANDOM.with(|r| r.borrow_mut().gen::<f64>());
    self.samples.push(WeightedSample { value, priority });
    if self.samples.len() > self.size {
      self.samples.pop();
    }
  }

  // Move the landmark forward, scaling every retained priority by
  // exp(-alpha * dt). Relative order is preserved exactly; only the common
  // exponent shrinks.
  fn rescale(&mut self, now: Instant) {
    let factor = (-self.alpha * now.duration_since(self.landmark).as_secs_f64()).exp();
    let rescaled: Vec<WeightedSample> = self
      .samples
      .drain()
      .map(|s| WeightedSample {
        value: s.value,
        priority: s.priority * factor,
      })
      .collect();
    self.samples.extend(rescaled);
    self.landmark = now;
    self.last_rescale = now;
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.samples.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  // Retained values, unordered. Used for export snapshots.
  #[must_use]
  pub fn values(&self) -> Vec<f64> {
    self.samples.iter().map(|s| s.value).collect()
  }

  // Quantile over the retained samples. Values are sorted and walked as unit
  // weights with midpoint upper bounds, interpolating inside the straddling
  // sample. For {5,10,15,20,25} this yields q(0.5)=15 and q(0.9)=23.75.
  #[must_use]
  #[allow(clippy::cast_precision_loss)]
  pub fn quantile(&self, q: f64) -> f64 {
    let mut values = self.values();
    if values.is_empty() {
      return 0.0;
    }
    values.sort_unstable_by(f64::total_cmp);

    let count = values.len();
    let index = q * count as f64;
    let mut weight_so_far = 0.0;
    let mut lower_bound = values[0];
    for i in 0 .. count {
      let upper_bound = if i + 1 == count {
        values[count - 1]
      } else {
        (values[i] + values[i + 1]) / 2.0
      };
      if index <= weight_so_far + 1.0 {
        let proportion = index - weight_so_far;
        return proportion * (upper_bound - lower_bound) + lower_bound;
      }
      weight_so_far += 1.0;
      lower_bound = upper_bound;
    }
    values[count - 1]
  }
}
