//! Core engine for the tether notebook kernel.
//!
//! This crate provides:
//! - Cell segmentation into directive sections and line directives
//! - Directive registry with declarative argument parsing
//! - Sequential fan-out of a cell across remote targets, with per-target
//!   fault isolation and guaranteed restoration of the current target
//! - Exclusive, scoped target sessions and the `exec://` transport
//! - Host-side execution for shell escapes and host sections

pub mod cell;
pub mod config;
pub mod directive;
pub mod directives;
pub mod engine;
pub mod error;
pub mod host;
pub mod interrupt;
pub mod output;
pub mod paths;
pub mod process;
pub mod target;

pub use config::{ConfigStore, JsonConfigStore, KernelOptions, LogControl, MemoryConfigStore};
pub use directive::{ArgSpec, Directive, DirectiveKind, DirectiveRegistry, Param, ParsedArgs};
pub use engine::{ExecuteReply, FanOut, Flow, Kernel, KernelBuilder};
pub use error::{Error, FaultClass, Result};
pub use host::{HostRuntime, SubprocessHost};
pub use interrupt::InterruptHandle;
pub use output::{BufferSink, Output, OutputSink, Stream, Style};
pub use paths::TetherDirs;
pub use target::{
    Connector, DeviceRegistry, DeviceStore, ExecConnector, Lease, MemoryRegistry, Session, Target,
};
