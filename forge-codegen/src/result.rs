//! The error taxonomy: one enum covering every way code generation can
//! fail, propagated with `?` rather than recovered from.

use thiserror::Error;

use crate::ir::instr::InvalidValue;
use crate::ir::listing::PartGraphError;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("invalid IR: {0}")]
    InvalidValue(#[from] InvalidValue),

    #[error("part graph violated: {0}")]
    PartGraph(#[from] PartGraphError),

    #[error("variable used outside its live scope: {0:?}")]
    VariableUse(crate::ir::entities::Variable),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("eh_frame FDE buffer overflowed its fixed-size allocation")]
    FdeOverflow,
}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// Builds an error tagging the failure as unreachable-reached -- used
/// where the invalid-instruction lowering should have ruled out the
/// combination the encoder is now looking at.
#[track_caller]
pub fn internal(msg: impl Into<String>) -> CodegenError {
    CodegenError::Internal(msg.into())
}
