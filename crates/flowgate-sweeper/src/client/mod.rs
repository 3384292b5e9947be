//! Collaborator service clients.

mod rest;

pub use rest::RestCollaborators;
