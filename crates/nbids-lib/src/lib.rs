#[macro_use]
pub mod entities;

pub mod audit;
pub mod behavior;
pub mod config;
pub mod dataset;
pub mod events;
pub mod io;
pub mod materialize;
pub mod mri;
pub mod plot;
pub mod report;
pub mod signal;
pub mod visual_field;

pub use config::ProjectConfig;
pub use entities::*;
pub use report::*;
pub use signal::*;
