#![deny(warnings)]

pub mod audio;
pub mod config;
pub mod dialogue;
pub mod pipeline;
pub mod tts;
pub mod util;
pub mod voices;
