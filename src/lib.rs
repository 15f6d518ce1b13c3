//! Deterministic household finance projection: a year-by-year simulator with
//! bear/bull shadow tracks, a catalog of toggleable strategies and a goal solver.

pub mod api;
pub mod core;
