//! HTTP/1.x protocol implementation.
//!
//! - **`parser`**: incremental request parser emitting lifecycle events
//! - **`hooks`**: per-connection hook chains run on those events
//! - **`request`** / **`response`**: message types
//! - **`writer`**: buffered and chunked response serialization
//! - **`connection`**: the per-connection state machine
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │  Accepted   │ ← post-accept hook installs hooks and close policy
//!        └──────┬──────┘
//!               ▼
//!        ┌────────────────┐
//!        │ ReadingRequest │ ← parser events run hooks; a hook may abort
//!        └──────┬─────────┘
//!               │ MessageComplete
//!               ▼
//!        ┌────────────────┐
//!        │   Dispatched   │ ← router picks exact route or generic callback
//!        └──────┬─────────┘
//!               ▼
//!        ┌─────────────────┐
//!        │ WritingResponse │ ← buffered or chunked
//!        └──────┬──────────┘
//!               ├─ keep-alive, policy allows → Idle → ReadingRequest
//!               └─ otherwise → Closing → Closed
//! ```

pub mod connection;
pub mod hooks;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
