// src/core/mod.rs
mod engine;
mod model;
mod collector;
mod export;
mod member_locator;
mod path_parser;
mod session;

// Source rewriting ahead of compilation
mod instrumentor;

// Backups, checkpoint and compilation of instrumented files
mod lifecycle;

// Debugger and probe driven line tracing
mod tracer;

pub use model::TestedInvoked;
pub use collector::CallCollector;
pub use export::{exporter_for, ExportFormat};
pub use path_parser::{TestPathParser, TestPathStore};
pub use session::CollectionSession;
pub use instrumentor::{InstrumentationProfile, SourceInstrumentor};
pub use lifecycle::{find_orphaned_backups, recover_backups, Checkpoint};

// Export the main engine
pub use engine::Engine;
