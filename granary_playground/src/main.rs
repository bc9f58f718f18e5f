// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::net::SocketAddr;

use clap::Parser;
use granary::concurrency::Duration;

mod distributed;
mod grains;
mod local;

#[derive(Debug, clap::Subcommand)]
enum Cli {
    /// Exercise grain placements and batching on a single node
    Local {
        /// Number of shards, defaults to the available parallelism
        #[clap(long)]
        shards: Option<usize>,
    },

    /// Run a cluster node which bumps a range of counters every few seconds
    Node {
        /// The address to listen on
        #[clap(long, default_value = "127.0.0.1:8198")]
        bind: SocketAddr,
        /// The address peers should reach this node at, if not the bound one
        #[clap(long)]
        advertise: Option<SocketAddr>,
        /// A peer to join through. May be repeated
        #[clap(long = "seed")]
        seeds: Vec<SocketAddr>,
        /// Number of shards, defaults to the available parallelism
        #[clap(long)]
        shards: Option<usize>,
        /// Number of counters bumped every round
        #[clap(long, default_value_t = 8)]
        keys: u64,
        /// Seconds between rounds
        #[clap(long, default_value_t = 5)]
        interval: u64,
    },
}

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    command: Cli,

    /// Set the logging level (e.g. trace, debug, info, warn, error). `RUST_LOG`
    /// takes precedence when set
    #[clap(short, long, default_value = "info")]
    log: String,
}

// MAIN //
#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log)).init();

    // parse the CLI and run the correct playground scenario
    match args.command {
        Cli::Local { shards } => {
            local::run_local(shards).await;
        }
        Cli::Node {
            bind,
            advertise,
            seeds,
            shards,
            keys,
            interval,
        } => {
            distributed::run_node(distributed::NodeOptions {
                bind,
                advertise,
                seeds,
                shards,
                keys,
                interval: Duration::from_secs(interval),
            })
            .await;
        }
    }
}
