pub mod args;
pub mod dictionary;
pub mod error;
pub mod io;
pub mod jamo;
pub mod matrix;
pub mod model;
pub mod product_quantizer;
pub mod quant_matrix;
pub mod vector;

use crate::error::JamoTextError;

pub type JamoTextResult<T> = Result<T, JamoTextError>;

pub const MODEL_FILE_MAGIC: i32 = 793712314;
pub const MODEL_FILE_VERSION: i32 = 12;
