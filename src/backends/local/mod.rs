// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod factory;
pub mod kernels;

pub use factory::LocalKernelFactory;
pub use kernels::*;
