// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Blob Store Port
//!
//! The write side of the backup: named objects that only ever grow.

use crate::domain::errors::Result;

/// Append-only object storage.
pub trait BlobStorePort: Send + Sync {
    /// Creates an empty object named `name` unless it already exists.
    ///
    /// Returns `true` when this call created it.
    fn create_if_absent(&self, name: &str) -> Result<bool>;

    /// Appends `block` to the end of an existing object.
    ///
    /// One call is atomic: either the whole block lands after every earlier
    /// block, or nothing does.
    fn append_block(&self, name: &str, block: &[u8]) -> Result<()>;

    /// Largest block a single `append_block` call accepts.
    fn max_block_bytes(&self) -> usize;

    /// Reads the full object. Returns `None` if it was never created.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;
}
