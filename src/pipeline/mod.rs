//! Pipeline stages for turning one PDF into an ordered document.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the remote side can be swapped behind
//! [`RemoteJobClient`](crate::client::RemoteJobClient).
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ pack ──▶ upload ──▶ submit ──▶ wait ──▶ decode ──▶ aggregate
//! (URL/path) (pdfium)  (JSONL)  └──────── bounded by schedule ───────┘    (sort)
//! ```
//!
//! 1. [`input`]     — resolve the path or URL to a local PDF and mint a trace id
//! 2. [`render`]    — rasterise every page to PNG in `spawn_blocking`
//! 3. [`pack`]      — group page requests into size-bounded upload units
//! 4. [`schedule`]  — run upload, submit and wait with a concurrency ceiling
//! 5. [`wait`]      — poll each job to a terminal state with backoff
//! 6. [`decode`]    — split a result payload back into per-page outputs
//! 7. [`aggregate`] — merge and order pages, checking coverage
//!
//! [`tracker`] records every remote resource as it is created and
//! [`batch::BatchPipeline`] deletes them all when the run ends.

pub mod aggregate;
pub mod batch;
pub mod custom_id;
pub mod decode;
pub mod input;
pub mod pack;
pub mod render;
pub mod schedule;
pub mod tracker;
pub mod wait;
