pub mod records;
pub mod upload;
pub mod verify;
