// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./hll_test.rs"]
mod hll_test;

use thiserror::Error;
use xxhash_rust::xxh64::xxh64;

// Register index bits. p=14 gives 16384 one-byte registers (~0.8% standard
// error) and is fixed: the export format embeds it and merges require equal
// parameters on both sides.
const PRECISION: u8 = 14;
const NUM_REGISTERS: usize = 1 << PRECISION;
const EXPORT_VERSION: u8 = 1;

// Bias correction constant alpha_m for m = 16384.
#[allow(clippy::cast_precision_loss)]
const ALPHA_M: f64 = 0.7213 / (1.0 + 1.079 / (NUM_REGISTERS as f64));

//
// HllError
//

#[derive(Error, Debug, Eq, PartialEq)]
pub enum HllError {
  #[error("sketch snapshot has wrong length {0}")]
  BadLength(usize),
  #[error("unsupported sketch version {0}")]
  BadVersion(u8),
  #[error("sketch precision {0} does not match ours")]
  PrecisionMismatch(u8),
}

//
// HyperLogLog
//

// Dense HyperLogLog cardinality sketch. Inserts hash the raw member bytes
// with a keyless xxh64 so that sketches built on different hosts merge
// losslessly: the same member always selects the same register and rank.
pub struct HyperLogLog {
  registers: Box<[u8; NUM_REGISTERS]>,
}

impl Default for HyperLogLog {
  fn default() -> Self {
    Self::new()
  }
}

impl HyperLogLog {
  #[must_use]
  pub fn new() -> Self {
    Self {
      registers: vec![0_u8; NUM_REGISTERS].into_boxed_slice().try_into().unwrap(),
    }
  }

  pub fn insert(&mut self, member: &[u8]) {
    let hash = xxh64(member, 0);
    // Top p bits select the register, the rest feed the rank.
    let index = (hash >> (64 - PRECISION)) as usize;
    let remaining = hash << PRECISION;
    let rank = (remaining.leading_zeros() + 1).min(64 - u32::from(PRECISION) + 1) as u8;
    if self.registers[index] < rank {
      self.registers[index] = rank;
    }
  }

  // Bias-corrected estimate with linear counting in the small range, which
  // keeps small sets essentially exact.
  #[must_use]
  #[allow(clippy::cast_precision_loss)]
  pub fn estimate(&self) -> f64 {
    let m = NUM_REGISTERS as f64;
    let mut sum = 0.0;
    let mut zeros = 0_usize;
    for &register in self.registers.iter() {
      sum += 2.0_f64.powi(-i32::from(register));
      if register == 0 {
        zeros += 1;
      }
    }

    let raw = ALPHA_M * m * m / sum;
    if raw <= 2.5 * m && zeros > 0 {
      m * (m / zeros as f64).ln()
    } else {
      raw
    }
  }

  #[must_use]
  pub fn count(&self) -> u64 {
    self.estimate().round() as u64
  }

  // Wire snapshot: [version:1][precision:1][registers:16384]. The layout is
  // stable across versions; consumers reject anything they cannot merge.
  #[must_use]
  pub fn export(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + NUM_REGISTERS);
    out.push(EXPORT_VERSION);
    out.push(PRECISION);
    out.extend_from_slice(self.registers.as_ref());
    out
  }

  // Lossless merge of an exported snapshot: registers take the pairwise max.
  pub fn combine(&mut self, snapshot: &[u8]) -> Result<(), HllError> {
    if snapshot.len() != 2 + NUM_REGISTERS {
      return Err(HllError::BadLength(snapshot.len()));
    }
    if snapshot[0] != EXPORT_VERSION {
      return Err(HllError::BadVersion(snapshot[0]));
    }
    if snapshot[1] != PRECISION {
      return Err(HllError::PrecisionMismatch(snapshot[1]));
    }

    for (register, &incoming) in self.registers.iter_mut().zip(&snapshot[2 ..]) {
      if *register < incoming {
        *register = incoming;
      }
    }
    Ok(())
  }
}
