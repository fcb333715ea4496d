pub mod calibration;
pub mod capture;
pub mod color;
pub mod config;
pub mod consts;
pub mod error;
pub mod frame;
pub mod io;
pub mod orchestrator;
pub mod progress;
pub mod solve;
pub mod stack;
pub mod status;
