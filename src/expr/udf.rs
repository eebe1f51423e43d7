use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TambakError};
use crate::expr::values::Values;
use crate::types::ScalarKind;

/// Signature of a user function: the decompressed inputs (already broadcast
/// to the output sub-region), a zero-filled output buffer of the declared
/// dtype to fill in place, and the offset of the sub-region in the full domain.
pub type UdfFn = dyn Fn(&[Values], &mut Values, &[usize]) -> Result<()> + Send + Sync;

/// A named user function with a declared output dtype.
#[derive(Clone)]
pub struct Udf {
    name: String,
    dtype: ScalarKind,
    func: Arc<UdfFn>,
}

impl Udf {
    pub fn new<F>(name: &str, dtype: ScalarKind, func: F) -> Self
    where
        F: Fn(&[Values], &mut Values, &[usize]) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            dtype,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> ScalarKind {
        self.dtype
    }

    /// Runs the function on one sub-region and checks what it left behind.
    pub(crate) fn call(&self, inputs: &[Values], shape: &[usize], offset: &[usize]) -> Result<Values> {
        let mut out = Values::zeros(self.dtype, shape);
        (self.func)(inputs, &mut out, offset).map_err(|e| match e {
            TambakError::UserFunction(_) => e,
            other => TambakError::UserFunction(format!("'{}' failed: {}", self.name, other)),
        })?;
        if out.shape() != shape || !out.holds(self.dtype) {
            return Err(TambakError::UserFunction(format!(
                "'{}' replaced its output buffer; expected {} of shape {:?}",
                self.name, self.dtype, shape
            )));
        }
        Ok(out.wrap(self.dtype))
    }
}

impl fmt::Debug for Udf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Udf")
            .field("name", &self.name)
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}
