pub mod etl;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod run;
pub mod transform;

pub use crate::domain::model::{CleanBatch, CleanRecord, RawBatch, RawRecord, TransformResult};
pub use crate::domain::ports::{Destination, Pipeline};
pub use crate::utils::error::Result;
