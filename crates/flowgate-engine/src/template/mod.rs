//! Template rendering.

mod jinja;

pub use jinja::{TemplateRenderer, BUILTIN_TEMPLATES};
