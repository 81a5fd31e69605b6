use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use klepto_core::archive::IArchive;
use klepto_core::observer::{ConsoleObserver, ObserverChain};
use klepto_core::recorder::{read_generation, Channel, ChannelData, Recorder};
use klepto_core::{SimConfig, Simulation};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "klepto")]
#[command(about = "Evolution of kleptoparasitic foraging on a toroidal landscape", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation
    Run {
        /// JSON config; defaults apply to missing fields
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output directory, overrides `output_dir` in the config
        #[arg(long)]
        out: Option<PathBuf>,
        /// Overrides `seed` in the config
        #[arg(long)]
        seed: Option<u64>,
        /// Overrides `worker_threads` in the config
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Print the default config as JSON
    DumpDefaultConfig,
    /// Decode one generation of an archive channel
    Extract {
        /// Run directory written by `run --out`
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, value_enum)]
        channel: ChannelArg,
        /// Generation index; lists the archive entries if omitted
        #[arg(long)]
        generation: Option<usize>,
        /// Raw little-endian output (f64 for floats, i32 for ancestors)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    Ann,
    Fitness,
    Ancestor,
    Behavior,
}

impl From<ChannelArg> for Channel {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Ann => Channel::Ann,
            ChannelArg::Fitness => Channel::Fitness,
            ChannelArg::Ancestor => Channel::Ancestor,
            ChannelArg::Behavior => Channel::Behavior,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SimConfig> {
    let Some(path) = path else {
        return Ok(SimConfig::default());
    };
    let file = File::open(path).with_context(|| format!("failed to open config {path:?}"))?;
    let config: SimConfig =
        serde_json::from_reader(BufReader::new(file)).context("failed to parse config")?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

fn run(
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    seed: Option<u64>,
    threads: Option<usize>,
) -> Result<()> {
    let mut config = load_config(config.as_deref())?;
    if out.is_some() {
        config.output_dir = out;
    }
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(threads) = threads {
        config.worker_threads = threads;
    }
    config.validate().context("config validation error")?;

    let output_dir = config.output_dir.clone();
    let mut sim = Simulation::new(config).context("failed to initialize simulation")?;
    let mut chain = ObserverChain::new().with(ConsoleObserver::default());
    if let Some(dir) = &output_dir {
        chain.push(Box::new(Recorder::new(dir.clone())));
    }
    let completed = sim.run(&mut chain).context("simulation failed")?;
    if !completed {
        info!("run stopped early");
    } else if let Some(dir) = output_dir {
        info!(dir = %dir.display(), "run complete");
    }
    Ok(())
}

fn write_channel(data: &ChannelData, path: &Path) -> Result<usize> {
    let mut w = BufWriter::new(File::create(path).context("failed to create output file")?);
    let count = match data {
        ChannelData::Floats(values) => {
            for &v in values {
                w.write_all(&(v as f64).to_le_bytes())?;
            }
            values.len()
        }
        ChannelData::Ints(values) => {
            for &v in values {
                w.write_all(&v.to_le_bytes())?;
            }
            values.len()
        }
    };
    w.flush()?;
    Ok(count)
}

fn extract(
    dir: &Path,
    channel: Channel,
    generation: Option<usize>,
    out: Option<&Path>,
) -> Result<()> {
    let Some(generation) = generation else {
        let archive = IArchive::open(dir.join(channel.file_name()))
            .with_context(|| format!("failed to open {}", channel.file_name()))?;
        println!("{} ({} entries)", archive.header(), archive.len());
        for (g, entry) in archive.entries().iter().enumerate() {
            println!(
                "  {g}: {} x {} bytes",
                entry.element_count, entry.element_size
            );
        }
        return Ok(());
    };

    let data = read_generation(dir, channel, generation)
        .with_context(|| format!("failed to read generation {generation}"))?;
    match out {
        Some(path) => {
            let count = write_channel(&data, path)?;
            info!(values = count, path = %path.display(), "extracted");
        }
        None => println!("{}", serde_json::to_string(&values_json(&data))?),
    }
    Ok(())
}

fn values_json(data: &ChannelData) -> serde_json::Value {
    match data {
        ChannelData::Floats(values) => serde_json::json!(values),
        ChannelData::Ints(values) => serde_json::json!(values),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::DumpDefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&SimConfig::default())?);
        }
        Commands::Run {
            config,
            out,
            seed,
            threads,
        } => run(config, out, seed, threads)?,
        Commands::Extract {
            dir,
            channel,
            generation,
            out,
        } => extract(&dir, channel.into(), generation, out.as_deref())?,
    }
    Ok(())
}
