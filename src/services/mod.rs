//! Service layer: the lifecycle engine and its supporting pieces.

pub mod artifacts;
pub mod codes;
pub mod passwords;
pub mod sessions;
pub mod share_service;
