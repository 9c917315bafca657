// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(unsafe_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![deny(clippy::all)]
#![allow(clippy::cast_possible_truncation)]

//! The packet generator: synthetic streams of edit groups driving the
//! graph through the same input-node interface a driver would.
//!
//! A stream compiles its edit groups once at enable time into a fixed-bytes
//! template plus a list of non-fixed edits keyed by bit offset; per-packet
//! work is limited to applying those edits, running each group's post-fixup
//! (checksums), and copying into template-primed buffers.

mod edit;
mod input;
mod interface;
mod serialize;
mod stream;

pub use edit::{read_bits, write_bits, Edit, EditKind, PgError};
pub use input::PgInput;
pub use interface::{PgDeviceClass, TxLog};
pub use serialize::{deserialize_streams, serialize_streams, StreamDescriptor};
pub use stream::{EditFunction, EditGroup, PgMain, SizeKind, Stream, StreamConfig, StreamIndex};
