// Domain layer: records, batches and the ports the engine drives.

pub mod model;
pub mod ports;
