//! The herald runner: configuration loading and the command loop that drives
//! a [`Dispatcher`](herald_dispatch::Dispatcher)

pub mod command;
pub mod controller;

pub use controller::{Herald, find_config_file};
