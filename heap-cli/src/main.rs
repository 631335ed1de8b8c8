//! Exercises the heap allocator against the scenarios it's built around,
//! logging each step and printing the resulting region layout.

mod logger;
mod sim_arena;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use heap::HeapManager;
use log::LevelFilter;
use sim_arena::SimArena;

#[derive(Parser)]
#[command(author, version, about = "Drive the heap allocator through scripted workloads")]
struct Cli {
    /// Bytes available to the simulated arena.
    #[arg(long, default_value_t = 1 << 20)]
    capacity: usize,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(level_for(cli.verbose));

    ensure!(cli.capacity >= heap::MIN_REGION_SIZE, "capacity too small to hold a single region");

    let arena = SimArena::new(cli.capacity);
    log::info!("reserved a {}-byte simulated arena", arena.capacity());
    let mut manager = HeapManager::new(arena);
    run_scenarios(&mut manager).context("scenario run failed")?;
    print_layout(&manager);
    Ok(())
}

fn run_scenarios(manager: &mut HeapManager<SimArena>) -> Result<()> {
    log::info!("scenario: alloc/free/alloc reuse");
    let a = manager.allocate(128).context("allocate(128)")?;
    manager.free(Some(a));
    let b = manager.allocate(128).context("allocate(128) after free")?;
    ensure!(a == b, "expected reuse of the freed region, got a different address");
    log::debug!("reused {:p} for the second allocate(128)", b.as_ptr());

    log::info!("scenario: split-then-coalesce");
    let big = manager.allocate(2000).context("allocate(2000)")?;
    manager.free(Some(big));
    let small = manager.allocate(32).context("allocate(32) into the split head")?;
    ensure!(small == big, "split should carve the new region off the freed region's head");
    manager.free(Some(small));
    log::debug!("freed {:p}; the split remainder should have coalesced back", small.as_ptr());

    log::info!("scenario: speculative probe recovers a near-fit one class below");
    let probe_donor = manager.allocate(96).context("allocate(96)")?;
    manager.free(Some(probe_donor));
    let probe_hit = manager.allocate(80).context("allocate(80)")?;
    log::debug!(
        "probe {} donor {:p} for an 80-byte request",
        if probe_hit == probe_donor { "reused" } else { "missed" },
        probe_donor.as_ptr()
    );

    log::info!("scenario: in-place grow via neighbor absorption");
    let g1 = manager.allocate(64).context("allocate(64)")?;
    let g2 = manager.allocate(64).context("allocate(64)")?;
    manager.free(Some(g2));
    let grown = manager.reallocate(Some(g1), 200).context("reallocate grow")?;
    ensure!(grown == g1, "growth should have absorbed the freed neighbor in place");

    log::info!("scenario: fallback grow (copy and free)");
    let f1 = manager.allocate(64).context("allocate(64)")?;
    let _blocker = manager.allocate(64).context("allocate(64) blocker")?;
    let moved = manager
        .reallocate(Some(f1), 8192)
        .context("reallocate grow with no absorbable neighbor")?;
    ensure!(moved != f1, "with no absorbable neighbor, growth should relocate");

    log::info!("scenario: calloc zeroes a reused region");
    let c1 = manager.allocate(256).context("allocate(256)")?;
    unsafe { std::ptr::write_bytes(c1.as_ptr(), 0xFF, 256) };
    manager.free(Some(c1));
    let zeroed = manager.zero_allocate(1, 256).context("zero_allocate(1, 256)")?;
    let bytes = unsafe { std::slice::from_raw_parts(zeroed.as_ptr(), 256) };
    ensure!(bytes.iter().all(|&b| b == 0), "calloc must zero a reused region");

    Ok(())
}

fn print_layout(manager: &HeapManager<SimArena>) {
    println!("{:<18} {:>10} {:>10}  status", "address", "total", "used");
    for region in manager.regions() {
        let status = if region.used_payload == 0 { "free" } else { "used" };
        println!(
            "{:#016x} {:>10} {:>10}  {status}",
            region.addr, region.total_size, region.used_payload
        );
    }
}
