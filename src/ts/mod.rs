//! MPEG-TS packetization: PES wrapping and 188-byte packet muxing with
//! PAT/PMT, PCR, and continuity counters. Spec §4.9, §4.10.

pub mod mux;
pub mod pes;
