//! Pipeline stages for accident-report extraction.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested on its own and swapped (e.g. a new model backend) without touching
//! the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ assemble ──▶ invoke ──▶ interpret ──▶ CanonicalRecord
//! (path/URL)  (pdf/image)   (blocks)    (model)   (two shapes)
//!                  │                        │           │
//!                  └────────────┬───────────┴───────────┘
//!                               ▼
//!                           fallback (degraded record)
//! ```
//!
//! 1. [`input`]     — resolve a path or URL to bytes plus a declared file name
//! 2. [`normalize`] — bytes → canonical document; PDF via [`render`], images
//!    flattened, downscaled and re-encoded via [`encode`]
//! 3. [`assemble`]  — ordered content blocks with fixed caps
//! 4. [`invoke`]    — call a [`backend::ModelBackend`] with retry/backoff; the
//!    only stage with network I/O
//! 5. [`interpret`] — structured object or tagged free text → record, using
//!    [`markup`] and [`checkbox`]
//! 6. [`fallback`]  — any terminal failure → degraded record

pub mod assemble;
pub mod backend;
pub mod checkbox;
pub mod encode;
pub mod fallback;
pub mod input;
pub mod interpret;
pub mod invoke;
pub mod markup;
pub mod normalize;
pub mod render;
