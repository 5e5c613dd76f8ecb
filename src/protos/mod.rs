//! Protobuf message definitions for the ONNX model format.
//!
//! Only the subset of `onnx.proto` that graph loading reads is declared;
//! unknown fields are skipped by the decoder.

pub mod onnx;
