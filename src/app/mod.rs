//! Application module

pub mod cli;
pub mod commands;
pub mod player;
pub mod startup;

#[cfg(test)]
mod tests;
