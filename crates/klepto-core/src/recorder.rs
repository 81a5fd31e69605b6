//! Observer that archives every recorded generation and writes run summaries.

use crate::analysis::GenerationSummary;
use crate::archive::{self, ArchiveError, IArchive, OArchive};
use crate::config::SimConfig;
use crate::observer::{Control, Event, Observer, ObserverError};
use crate::simulation::Simulation;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-generation archive channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Controller weights, one `state_size` block per agent.
    Ann,
    /// `f32` fitness per agent.
    Fitness,
    /// `i32` parent index per agent.
    Ancestor,
    /// `[foraged, handled]` `f32` pair per agent.
    Behavior,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Ann,
        Channel::Fitness,
        Channel::Ancestor,
        Channel::Behavior,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Channel::Ann => "ann.arc",
            Channel::Fitness => "fitness.arc",
            Channel::Ancestor => "ancestor.arc",
            Channel::Behavior => "behavior.arc",
        }
    }
}

/// Decoded content of one channel entry.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Floats(Vec<f32>),
    Ints(Vec<i32>),
}

/// Decompress generation `generation` of `channel` from a run directory.
pub fn read_generation(
    dir: &Path,
    channel: Channel,
    generation: usize,
) -> Result<ChannelData, ArchiveError> {
    let mut archive = IArchive::open(dir.join(channel.file_name()))?;
    let blob = archive.extract(generation)?;
    let mut bytes = vec![0u8; blob.uncompressed_len()];
    archive::uncompress(&blob, &mut bytes, blob.element_size)?;
    let words = bytes.chunks_exact(4).map(|b| [b[0], b[1], b[2], b[3]]);
    Ok(match channel {
        Channel::Ancestor => ChannelData::Ints(words.map(i32::from_le_bytes).collect()),
        _ => ChannelData::Floats(words.map(f32::from_le_bytes).collect()),
    })
}

fn default_schema_version() -> u32 {
    1
}

/// Contents of `summary.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub seed: u64,
    pub controller: String,
    pub agents: usize,
    pub generations: usize,
    pub summaries: Vec<GenerationSummary>,
}

struct Archives {
    ann: OArchive<BufWriter<File>>,
    fitness: OArchive<BufWriter<File>>,
    ancestor: OArchive<BufWriter<File>>,
    behavior: OArchive<BufWriter<File>>,
}

impl Archives {
    fn create(dir: &Path, descriptor: &str) -> Result<Self, ArchiveError> {
        Ok(Self {
            ann: OArchive::create(dir.join(Channel::Ann.file_name()), descriptor)?,
            fitness: OArchive::create(dir.join(Channel::Fitness.file_name()), "fitness")?,
            ancestor: OArchive::create(dir.join(Channel::Ancestor.file_name()), "ancestor")?,
            behavior: OArchive::create(dir.join(Channel::Behavior.file_name()), "behavior")?,
        })
    }

    fn finish(&mut self) -> Result<(), ArchiveError> {
        self.ann.finish()?;
        self.fitness.finish()?;
        self.ancestor.finish()?;
        self.behavior.finish()
    }
}

/// Archives each recorded generation into `dir`.
pub struct Recorder {
    dir: PathBuf,
    archives: Option<Archives>,
}

impl Recorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            archives: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_generation(archives: &mut Archives, sim: &Simulation) -> Result<(), ArchiveError> {
        let pop = sim.population();
        let n = pop.len();
        let controller = pop.controller();
        let state_bytes = controller.state_size() * std::mem::size_of::<f32>();
        archives.ann.insert(
            controller.arena().as_bytes(),
            n,
            state_bytes,
            controller.type_size(),
        )?;
        archives
            .fitness
            .insert(bytemuck::cast_slice(pop.fitness()), n, 4, 4)?;
        let ancestors: Vec<i32> = pop
            .individuals()
            .iter()
            .map(|ind| ind.ancestor as i32)
            .collect();
        archives
            .ancestor
            .insert(bytemuck::cast_slice(&ancestors), n, 4, 4)?;
        let behavior: Vec<f32> = pop
            .foraged()
            .iter()
            .zip(pop.handled())
            .flat_map(|(&f, &h)| [f, h])
            .collect();
        archives
            .behavior
            .insert(bytemuck::cast_slice(&behavior), n, 8, 8)?;
        Ok(())
    }

    fn write_summaries(&self, sim: &Simulation) -> Result<(), ObserverError> {
        let analysis = sim.analysis();
        analysis.write_summary_bin(BufWriter::new(File::create(self.dir.join("summary.bin"))?))?;
        analysis.write_input_bin(BufWriter::new(File::create(self.dir.join("input.bin"))?))?;

        let config: &SimConfig = sim.config();
        let mut w = BufWriter::new(File::create(self.dir.join("config.json"))?);
        serde_json::to_writer_pretty(&mut w, config)?;
        w.flush()?;

        let summary = RunSummary {
            schema_version: default_schema_version(),
            seed: config.seed,
            controller: config.agents.controller.clone(),
            agents: config.agents.size,
            generations: analysis.summaries().len(),
            summaries: analysis.summaries().to_vec(),
        };
        let mut w = BufWriter::new(File::create(self.dir.join("summary.json"))?);
        serde_json::to_writer_pretty(&mut w, &summary)?;
        w.flush()?;
        Ok(())
    }
}

impl Observer for Recorder {
    fn notify(&mut self, sim: &Simulation, event: Event) -> Result<Control, ObserverError> {
        match event {
            Event::Initialized => {
                fs::create_dir_all(&self.dir)?;
                let descriptor = sim.population().controller().descriptor();
                self.archives = Some(Archives::create(&self.dir, descriptor)?);
                info!(dir = %self.dir.display(), "recording generations");
            }
            Event::GenerationComplete => {
                if let Some(archives) = self.archives.as_mut() {
                    Self::record_generation(archives, sim)?;
                }
            }
            Event::Finished => {
                if let Some(mut archives) = self.archives.take() {
                    archives.finish()?;
                }
                self.write_summaries(sim)?;
            }
            Event::NewGeneration | Event::PostTimestep | Event::Watchdog => {}
        }
        Ok(Control::Continue)
    }
}
