//! Infrastructure layer: the kernel uhid device, the UDP services, and
//! configuration persistence.

pub mod network;
pub mod storage;
pub mod uhid;
