pub mod activation;
pub mod conv1d;
pub mod dropout;
pub mod init;
pub mod linear;
pub mod lstm;
pub mod module;
pub mod tree_lstm;
pub mod var_builder;
pub mod varmap;

pub use activation::Activation;
pub use conv1d::Conv1d;
pub use dropout::Dropout;
pub use init::Init;
pub use linear::Linear;
pub use lstm::{LstmCell, MaskedLstm, ScanDirection};
pub use module::{Module, TrainMode};
pub use tree_lstm::BinaryTreeLstmCell;
pub use var_builder::VarBuilder;
pub use varmap::VarMap;
