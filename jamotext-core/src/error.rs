use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum JamoTextErrorKind {
    Args,
    Io,
    Parse,
    Serialize,
    Deserialize,
    Vocabulary,
    Model,
    Matrix,
    Quantize,
    Numeric,
    Interrupted,
}

impl JamoTextErrorKind {
    pub fn with_error<E>(self, source: E) -> JamoTextError
    where
        anyhow::Error: From<E>,
    {
        JamoTextError {
            kind: self,
            source: From::from(source),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("JamoTextError(kind={kind:?}, source={source})")]
pub struct JamoTextError {
    pub kind: JamoTextErrorKind,
    #[source]
    source: anyhow::Error,
}

impl JamoTextError {
    pub fn add_context<C>(self, ctx: C) -> Self
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        JamoTextError {
            kind: self.kind,
            source: self.source.context(ctx),
        }
    }

    pub fn kind(&self) -> JamoTextErrorKind {
        self.kind
    }
}
