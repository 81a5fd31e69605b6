use klepto_core::config::{LandscapeConfig, PopulationConfig, SimConfig};
use klepto_core::simulation::StepTimings;
use klepto_core::Simulation;
use std::time::Instant;

const WARMUP_STEPS: usize = 20;
const BENCHMARK_STEPS: usize = 200;

fn bench_config(dim: usize, agents: usize, controller: &str, threads: usize) -> SimConfig {
    SimConfig {
        seed: 42,
        // one generation with heavy mutation so controllers carry non-zero weights
        generations: 1,
        timesteps: 10,
        worker_threads: threads,
        agents: PopulationConfig {
            size: agents,
            controller: controller.to_string(),
            mutation_prob: 1.0,
            mutation_step: 0.5,
            mutation_knockout: 0.0,
            ..PopulationConfig::default()
        },
        landscape: LandscapeConfig {
            dim,
            ..LandscapeConfig::default()
        },
        ..SimConfig::default()
    }
}

fn run_benchmark(dim: usize, agents: usize, controller: &str, threads: usize) {
    let mut sim = match Simulation::new(bench_config(dim, agents, controller, threads)) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("  {controller} {dim}x{dim}/{agents}: {e}");
            return;
        }
    };
    if let Err(e) = sim.run(&mut ()) {
        eprintln!("  {controller} {dim}x{dim}/{agents}: {e}");
        return;
    }

    for _ in 0..WARMUP_STEPS {
        sim.step();
    }

    let mut sum = StepTimings::default();
    let start = Instant::now();
    for _ in 0..BENCHMARK_STEPS {
        let t = sim.step();
        sum.regrowth_us += t.regrowth_us;
        sum.move_us += t.move_us;
        sum.occupancy_us += t.occupancy_us;
        sum.contention_us += t.contention_us;
        sum.total_us += t.total_us;
    }
    let elapsed = start.elapsed();
    let sps = BENCHMARK_STEPS as f64 / elapsed.as_secs_f64();
    let n = BENCHMARK_STEPS as u64;

    println!(
        "  {controller:<10} dim={dim:<4} agents={agents:<6} threads={threads:<2} {sps:>9.1} steps/sec"
    );
    println!(
        "    regrowth {:>6}us  move {:>6}us  occupancy {:>6}us  contention {:>6}us  total {:>6}us",
        sum.regrowth_us / n,
        sum.move_us / n,
        sum.occupancy_us / n,
        sum.contention_us / n,
        sum.total_us / n
    );
}

fn main() {
    if cfg!(debug_assertions) {
        eprintln!("WARNING: running in debug mode. Results are not representative.");
        eprintln!("         Use: cargo run -p klepto-cli --release --bin benchmark_generation");
        eprintln!();
    }
    println!("Warmup: {WARMUP_STEPS} steps, Benchmark: {BENCHMARK_STEPS} steps");

    let sizes = [
        (128, 1_000),  // defaults
        (256, 10_000),
        (512, 50_000), // stress test
    ];
    let controllers = ["DumbAnn", "SmartAnn"];
    let threads = [1, 0];

    for controller in controllers {
        println!("=== {controller} ===");
        for (dim, agents) in sizes {
            for t in threads {
                run_benchmark(dim, agents, controller, t);
            }
        }
    }
}
