// Pentecter - LLM-driven assistant for authorized penetration testing
// Library exports

// Core modules
pub mod agent; // Per-target Brain-Action-Observation loop
pub mod brain; // Brain contract, Action sum type, prompt composition
pub mod config;
pub mod errors; // Typed error kinds shared across the core
pub mod knowledge; // Local technique notes (search / read)
pub mod logging;
pub mod mcp; // Bridge to external MCP tool servers
pub mod memory; // Per-host finding store and prompt digest
pub mod providers; // HTTP clients for LLM vendors
pub mod recon; // Structured reconnaissance queue
pub mod runner; // Streaming subprocess runner
pub mod subtask; // Bounded background sub-task scheduler
pub mod target; // Target state, display blocks, proposals
pub mod team; // Target table, loop spawning, event bus
