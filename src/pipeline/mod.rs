//! Pipeline stages for judgment analysis.
//!
//! Each submodule implements one transformation step, so each can be
//! tested alone and swapped (another OCR engine, another backend) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ chunk ──▶ orchestrator ──▶ CompleteAnalysisResult
//! (path/URL) (digital    (anchored   (steps × backend,
//!            or OCR)     chunks)     retry, json, anchors)
//! ```
//!
//! 1. [`input`]   load a path or URL into memory and check the `%PDF` magic
//! 2. [`extract`] text layer or OCR ([`render`] + [`ocr`]) per page
//! 3. [`chunk`]   paragraph split, size-bounded windows, stable ids
//! 4. [`orchestrator`] runs the [`steps`] in order against a
//!    [`backend::GenerationBackend`] with [`retry`], parses with [`json`]
//!    and collects [`anchors`]. [`offline`] is the deterministic backend.

pub mod anchors;
pub mod backend;
pub mod chunk;
pub mod extract;
pub mod input;
pub mod json;
pub mod ocr;
pub mod offline;
pub mod orchestrator;
pub mod render;
pub mod retry;
pub mod steps;
