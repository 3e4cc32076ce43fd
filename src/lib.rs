//! Working memory and plan coordination for autonomous coding agents.
//!
//! Tessera is a JSON-RPC server in the MCP style. Agents working on the same project
//! share three kinds of append-only records and a set of plans whose steps they claim
//! one at a time:
//!
//! | Kind | Thread prefix | Purpose |
//! |------|---------------|---------|
//! | **Decision** | `dthr_` | A choice that was made, with its rationale |
//! | **Insight** | `ithr_` | Something learned while working |
//! | **Context** | `cthr_` | A snapshot of working context to resume from |
//! | **Plan** | `pthr_` | Ordered steps worked through by many agents |
//!
//! # Architecture
//!
//! - **Storage**: SQLite in WAL mode behind one shared connection
//! - **Coordination**: claims take a per-plan try-lock and an IMMEDIATE transaction,
//!   so concurrent claims never wait and never hand out the same step twice
//! - **Transport**: `POST /mcp/{project}` over HTTP, or newline-delimited JSON on stdio
//!
//! # Modules
//!
//! - [`protocol`]: JSON-RPC envelopes and the method router
//! - [`tools`]: the tool registry and the built-in tool groups
//! - [`plans`]: plan lifecycle and the claim protocol
//! - [`records`]: insights, decisions and contexts
//! - [`db`]: connection setup, schema, migrations and claim locks

pub mod cli;
pub mod config;
pub mod db;
pub mod plans;
pub mod projects;
pub mod protocol;
pub mod records;
pub mod server;
pub mod telemetry;
pub mod thread;
pub mod tools;
