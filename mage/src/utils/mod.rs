// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Miscellaneous utilities

pub mod rng;
