#![no_std]

//! ESP32-S3 adapters for `elato-core`: flash preferences, embassy-net
//! discovery transports, GPIO inputs, audio port control and deep sleep.

pub mod audio;
pub mod input;
pub mod network;
pub mod power;
pub mod scheduler;
pub mod storage;
pub mod time;
