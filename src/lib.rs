//! NOF1 Competition Tracker Library
//!
//! Collection-and-persistence pipeline for the NOF1 trading competition:
//! scheduled cycles fetch leaderboard standings, trade history and model
//! reasoning logs, and store them idempotently per season.

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod task_runner;
