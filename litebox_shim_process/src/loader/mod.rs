// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Executable image identification
//!
//! The launcher never maps an image itself. It only needs to know what kind
//! of file it was handed so it can pick the right way to start it.

pub mod binary;

pub use binary::{BinaryType, Sniffed, sniff, sniff_bytes};
