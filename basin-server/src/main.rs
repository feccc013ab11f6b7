// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use anyhow::Context;
use basin_server::config::Config;
use basin_server::run_server;
use clap::Parser;
use log::info;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tikv_jemallocator::Jemalloc;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug, Clone)]
struct Options {
  #[arg(short = 'f', long = "config")]
  pub config: PathBuf,
}

fn main() -> anyhow::Result<()> {
  let opts = Options::parse();
  let config = Config::load_from_file(&opts.config)
    .with_context(|| format!("can't load config file from {}", opts.config.display()))?;

  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
    if config.debug { "debug" } else { "info" },
  ))
  .init();
  info!("loaded config file {}", opts.config.display());

  let num_threads = std::thread::available_parallelism().unwrap_or_else(|_| {
    log::warn!("could not determine number of CPUs. Defaulting to 1");
    NonZeroUsize::new(1).unwrap()
  });
  log::info!("running server with {num_threads} runtime threads");
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(num_threads.into())
    .enable_all()
    .build()
    .unwrap();

  runtime.block_on(async {
    run_server(config, async {
      // Trap ctrl+c and sigterm messages and perform a clean shutdown
      let mut sigint = signal(SignalKind::interrupt()).unwrap();
      let mut sigterm = signal(SignalKind::terminate()).unwrap();
      select! {
        _ = sigint.recv() => info!("received sigint"),
        _ = sigterm.recv() => info!("received sigterm"),
      }
    })
    .await
  })
}
