//! Peripheral drivers

pub mod ethernet;
