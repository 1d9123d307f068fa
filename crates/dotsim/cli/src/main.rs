// Dotsim
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Dotsim CLI Tool
//!
//! Command-line interface for running concurrency-control simulations.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotsim_core::{SimConfig, Simulation, TracingSink, TransactionOutcome};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "dotsim")]
#[command(about = "Dotsim - Concurrency-control simulator")]
#[command(version = "0.1.0")]
struct Cli {
    /// Number of transactions to run
    #[arg(long, short = 't', default_value_t = 10)]
    transactions: usize,

    /// Number of shared resources
    #[arg(long, short = 'r', default_value_t = 2)]
    resources: usize,

    /// Restart cap per transaction (0 means retry forever)
    #[arg(long, default_value_t = 64)]
    max_restarts: u32,

    /// Lower bound for simulated think time, in milliseconds
    #[arg(long, default_value_t = 1)]
    think_min_ms: u64,

    /// Upper bound for simulated think time, in milliseconds
    #[arg(long, default_value_t = 10)]
    think_max_ms: u64,

    /// RNG seed for delays, so runs are reproducible
    #[arg(long, short = 's', default_value_t = 0)]
    seed: u64,

    /// Interval of the periodic deadlock sweep, in milliseconds
    #[arg(long)]
    sweep_ms: Option<u64>,

    /// Interval of the wait-for graph renderer, in milliseconds
    #[arg(long)]
    render_ms: Option<u64>,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if cli.transactions == 0 || cli.resources == 0 {
        error!("transactions and resources must both be at least 1");
        process::exit(1);
    }
    if cli.think_min_ms > cli.think_max_ms {
        error!("think-min-ms must not exceed think-max-ms");
        process::exit(1);
    }

    let config = SimConfig {
        transactions: cli.transactions,
        resources: cli.resources,
        max_restarts: (cli.max_restarts > 0).then_some(cli.max_restarts),
        think_min: Duration::from_millis(cli.think_min_ms),
        think_max: Duration::from_millis(cli.think_max_ms),
        seed: cli.seed,
        sweep_interval: cli.sweep_ms.map(Duration::from_millis),
        render_interval: cli.render_ms.map(Duration::from_millis),
    };

    info!(
        "starting simulation: {} transactions over {} resources (seed {})",
        config.transactions, config.resources, config.seed
    );

    let simulation = match Simulation::new(config, Arc::new(TracingSink)) {
        Ok(simulation) => simulation,
        Err(e) => {
            error!("Failed to set up simulation: {}", e);
            process::exit(1);
        }
    };

    let report = match simulation.run() {
        Ok(report) => report,
        Err(e) => {
            error!("Simulation failed: {}", e);
            process::exit(1);
        }
    };

    println!("Simulation finished:");
    for txn in &report.transactions {
        let outcome = match txn.outcome {
            TransactionOutcome::Committed => "committed",
            TransactionOutcome::Starved => "starved",
        };
        println!(
            "  T{}: {} after {} restart(s), final ts={}",
            txn.tid, outcome, txn.restarts, txn.final_timestamp
        );
    }
    println!(
        "  {}/{} committed, {} total restarts, {} cycle(s) broken",
        report.committed_count(),
        report.transactions.len(),
        report.total_restarts(),
        report.statistics.cycles_detected
    );

    let starved = report.starved();
    if !starved.is_empty() {
        warn!("starved transactions: {:?}", starved);
    }
    info!("Simulation complete");
}
