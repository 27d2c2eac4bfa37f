//! Route handlers

pub mod cron;
pub mod health;
