pub mod backtest;
pub mod calibration;
pub mod oracle;
pub mod training;
