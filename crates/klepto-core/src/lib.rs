pub mod analysis;
pub mod ann;
pub mod archive;
pub mod arena;
pub mod config;
pub mod controller;
pub mod individual;
pub mod kernel;
pub mod landscape;
pub mod observer;
pub mod population;
pub mod recorder;
pub mod rng;
pub mod simulation;

pub use config::SimConfig;
pub use observer::{Control, Event, Observer, ObserverChain};
pub use simulation::{Simulation, SimulationError};
