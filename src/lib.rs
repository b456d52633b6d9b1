#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod assistant;
pub mod config;
pub mod error;
pub mod llm;
pub mod session;
pub mod transport;

pub use assistant::Assistant;
pub use config::Config;
pub use error::{KeyloomError, Result};
