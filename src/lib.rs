//! Streaming client for an AI FiveM script generator.
//!
//! A [`GenerationRequest`] is POSTed to the generation endpoint and the
//! server-sent event response is decoded as it arrives: text deltas go to
//! the observer as they stream, and every `### FILE:` section is delivered
//! as a [`GeneratedFile`] the moment its end marker is seen.

pub mod commands;
pub mod error;
pub mod request;
pub mod stream;
pub mod util;

pub use commands::bundle::ScriptBundle;
pub use commands::generate::{
    GenerationClient, GenerationEvent, GenerationHandle, GenerationObserver,
};
pub use error::{GeneratorError, Result};
pub use request::{GenerationMode, GenerationRequest, GenerationSource, Preferences};
pub use stream::{DuplicatePolicy, FileCategory, GeneratedFile};
