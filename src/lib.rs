// src/lib.rs
pub mod analysis;
pub mod archive;
pub mod config;
pub mod drivers;
pub mod engine;
pub mod gui;
pub mod measure;
pub mod recorder;
pub mod rig;
pub mod sensor;
pub mod series;
pub mod sweep;
pub mod types;
