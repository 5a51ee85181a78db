pub mod alert;
pub mod subscription;
pub(crate) mod timestamp;
pub mod validation;
