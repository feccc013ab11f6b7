// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod aggregation;
pub mod flush;
pub mod hll;
pub mod listener;
pub mod protos;
pub mod reservoir;
pub mod sinks;
pub mod telemetry;
pub mod worker;
