//! Kestrel tooling library: the proof-game pipeline.

pub mod proof;
