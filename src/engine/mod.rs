//! The Net-Reduction Evaluation and Aggregation Pipeline (C1-C10), plus the
//! two boundary interfaces it depends on (C11 authorization, C12 repository).

pub mod authz;
pub mod channel;
pub mod entry_store;
pub mod events;
pub mod expr;
pub mod frozen;
pub mod methodology;
pub mod model;
pub mod repository;
pub mod round6;
pub mod series;
pub mod summary;
pub mod time_normalizer;
