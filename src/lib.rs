// src/lib.rs — Library root for fusionbridge

pub mod api;
pub mod cli;
pub mod infra;
pub mod monitor;
pub mod portal;
