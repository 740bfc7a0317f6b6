pub mod hogwild;
pub mod jamotext;
pub mod trainer;

pub use jamotext_core::args::{Args, LossKind, ModelKind};
pub use jamotext_core::error::{JamoTextError, JamoTextErrorKind};
pub use jamotext_core::JamoTextResult;

pub use crate::jamotext::{JamoText, Prediction, TestMetrics};
