use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-sample shape of a layer's input or output. The batch axis is never
/// part of a `TensorShape`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TensorShape {
	dims: Vec<usize>,
}

impl TensorShape {
	pub fn new(dims: Vec<usize>) -> Self {
		Self { dims }
	}

	/// Number of scalars in one sample.
	pub fn dims(&self) -> usize {
		self.dims.iter().product()
	}

	/// The full array shape for a batch of `batch` samples.
	pub fn with_batch(&self, batch: usize) -> Vec<usize> {
		let mut shape = Vec::with_capacity(self.dims.len() + 1);
		shape.push(batch);
		shape.extend_from_slice(&self.dims);
		shape
	}

	/// Whether a batched array shape holds samples of this shape.
	pub fn matches_batched(&self, shape: &[usize]) -> bool {
		shape.len() == self.dims.len() + 1 && shape[1..] == self.dims[..]
	}
}

impl From<Vec<usize>> for TensorShape {
	fn from(v: Vec<usize>) -> Self {
		Self { dims: v }
	}
}

impl fmt::Display for TensorShape {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:?}", self.dims)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_batched_shape() {
		let shape = TensorShape::new(vec![128, 1]);
		assert_eq!(shape.dims(), 128);
		assert_eq!(shape.with_batch(4), vec![4, 128, 1]);
		assert!(shape.matches_batched(&[4, 128, 1]));
		assert!(!shape.matches_batched(&[128, 1]));
		assert!(!shape.matches_batched(&[4, 127, 1]));
	}
}
