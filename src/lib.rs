//! Batch OCR for PNG images.
//!
//! Images are collected into an in-memory queue, filtered to PNG, and
//! recognised one at a time by a single long-lived Tesseract engine. Results
//! and failures are aggregated per run and can be exported as text files or
//! a zip archive. The library backs both the HTTP server and the `ocr-batch`
//! command-line tool.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
