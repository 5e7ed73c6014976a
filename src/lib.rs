pub mod array2d;
pub mod bitstream;
pub mod cabac;
pub mod config;
pub mod consts;
pub mod context;
pub mod cu;
pub mod error;
pub mod filter;
pub mod frame;
pub mod inter;
pub mod intra;
pub mod nal;
pub mod pipeline;
pub mod ratecontrol;
pub mod rdcost;
pub mod search;
pub mod syntax;
pub mod transform;
pub mod util;

pub use error::{EncoderError, Result};
pub use frame::{Frame, SliceType};
pub use pipeline::{Encoder, PipelineConfig};
