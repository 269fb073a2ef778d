pub use transfer::*;

pub mod transfer;
