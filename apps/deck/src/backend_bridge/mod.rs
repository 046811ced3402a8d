//! Backend bridge: command queue from the UI plus the worker thread that owns the I/O runtime.

pub mod commands;
pub mod runtime;
