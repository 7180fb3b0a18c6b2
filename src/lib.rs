//! Descriptor-ring DMA driver core for Synopsys-style Ethernet MACs
//! (TM4C129 EMAC0, STM32 ETH and relatives)

#![cfg_attr(not(test), no_std)]
#![warn(dead_code)]
#![deny(missing_docs)]

pub mod drivers;
