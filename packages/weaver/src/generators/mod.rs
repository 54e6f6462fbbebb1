//! Concrete [`Generator`](crate::traits::generator::Generator) backends.

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAiGenerator;
