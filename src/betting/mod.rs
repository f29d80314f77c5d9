pub mod custom;
pub mod features;
pub mod kelly;
pub mod markets;
pub mod predictor;
pub mod selector;

pub use predictor::Predictor;
