//! MCP tool implementations.

pub mod search_notes;
