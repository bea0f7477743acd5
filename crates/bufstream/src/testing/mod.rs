// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Utilities for testing code that uses `bufstream` abstractions.

mod fake_transport;

pub use fake_transport::*;
