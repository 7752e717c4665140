//! VOD Runner - Remote Transcoding Agent
//!
//! Runs video-on-demand transcoding jobs handed out by a coordinating
//! server: downloads the inputs, drives ffmpeg to produce web video, HLS or
//! audio-merge outputs, submits the artifacts and always removes its scratch
//! files afterwards.

pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod fetch;
pub mod job;
pub mod mutex;
pub mod processor;
pub mod report;
pub mod scratch;
pub mod worker;

#[cfg(test)]
mod testing;
