//! Shipped keyring backends

pub mod aws_ssm;
pub mod bitwarden;
pub mod local_fs;
