pub mod conv;
pub mod dense;
pub mod dnn;
pub mod layer;
pub mod lstm;
pub mod pool;
pub mod relu;
pub mod reshape;
pub mod softmax;

pub use conv::Conv1d;
pub use dense::Dense;
pub use dnn::DNN;
pub use layer::Layer;
pub use lstm::Lstm;
pub use pool::GlobalAvgPool1d;
pub use relu::ReLU;
pub use reshape::Reshape;
