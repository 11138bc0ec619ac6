//! Data contracts shared by the valley engine and CLI: the style catalog, job
//! records, session commands, the event log and gallery snapshots.

pub mod catalog;
pub mod chat;
pub mod events;
pub mod gallery;
pub mod jobs;
