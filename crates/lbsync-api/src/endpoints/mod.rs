mod network;
mod slb;
mod system;

pub use slb::VsStats;
