pub mod board;
pub mod calibration;
pub mod error;
pub mod mass;
pub mod models;
pub mod pipeline;
pub mod settings;
