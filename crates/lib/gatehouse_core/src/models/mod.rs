//! Domain models shared by the services and storage layers.

pub mod auth;
pub mod policy;
