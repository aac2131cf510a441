pub mod app;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod controller;
pub mod dictionary;
pub mod fuzzer;
pub mod output;
pub mod requester;
pub mod runner;
pub mod utils;

#[cfg(test)]
mod tests;
