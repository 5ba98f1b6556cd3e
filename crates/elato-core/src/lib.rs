#![cfg_attr(not(test), no_std)]

//! Board-independent logic for the Elato voice device: state register,
//! sleep lifecycle, input gestures, server discovery and persistence.

pub mod cache;
pub mod discovery;
pub mod input;
pub mod lifecycle;
pub mod signals;
pub mod state;
pub mod storage;
pub mod tasks;
pub mod time;

pub use signals::{AudioDirection, DeviceContext, PipelineAction};
pub use state::{DeviceState, DeviceStateCell, StateError};
