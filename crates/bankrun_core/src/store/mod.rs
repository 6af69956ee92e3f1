//! Concrete bank store behind the kernel's collaborator traits.

pub mod bank_store;
