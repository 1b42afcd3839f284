//! font2font model components: generator (encoder + decoder), discriminator
//! variants, the compiled model handle and the host tensor bridge.

pub mod bridge;
pub mod compiled;
pub mod config;
pub mod decoder;
pub mod discriminator;
pub mod encoder;
pub mod generator;
