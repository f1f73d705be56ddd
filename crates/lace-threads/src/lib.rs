// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod ids;
mod manager;
mod reconstruct;

pub use ids::{delegate_index, generate_thread_id, is_delegate_thread_id, parent_thread_id};
pub use manager::ThreadManager;
pub use reconstruct::build_conversation;
