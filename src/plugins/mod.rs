//! Parsers and sinks for the supported markup formats.
//!
//! The converter only sees the traits in [`backend`]. Everything else in this
//! module is the built-in plugin set that [`BuiltinRegistry`] hands out.
//!
//! ```text
//! reader ──▶ Parser ──events──▶ [VelocitySink] ──▶ FormattingMacroSink ──▶ Sink ──▶ writer
//!                    └─macros──────────────────────────────┘
//! ```

pub mod apt;
pub mod backend;
pub mod events;
pub mod markdown;
pub mod registry;
pub mod velocity;
pub mod writer;
pub mod xml;
pub mod xml_sink;

pub use backend::{
    ComponentUnavailable, FormatRegistry, MacroSink, ParseError, Parser, Role, Sink, SinkFactory,
};
pub use events::{Block, Event};
pub use registry::BuiltinRegistry;
pub use velocity::VelocitySink;
