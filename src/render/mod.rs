//! HTML rendering of model output.
//!
//! - [`html`]: ResponseFormatter, escaping, streaming document fragments

pub mod html;
