// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cryptographically strong identities for naming private sockets.
//!
//! Every identity starts from 512 bits of OS entropy and is rendered either
//! as lowercase hex (for abstract-namespace socket names, where any byte but
//! NUL is legal) or as base64 with the path-hostile characters stripped (for
//! socket files under `/tmp`).

use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Entropy drawn per generated identity.
pub const IDENTITY_ENTROPY_BYTES: usize = 64;

fn entropy() -> [u8; IDENTITY_ENTROPY_BYTES] {
    let mut bytes = [0u8; IDENTITY_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Lowercase hex rendering, truncated to at most `len` characters.
pub fn hex_id(len: usize) -> String {
    let mut id = hex::encode(entropy());
    id.truncate(len);
    id
}

/// Base64 rendering with `+`, `/` and padding stripped, leaving only
/// characters that are safe inside a filesystem path component.
pub fn base64_id() -> String {
    base64::engine::general_purpose::STANDARD
        .encode(entropy())
        .chars()
        .filter(|c| !matches!(c, '+' | '/' | '='))
        .collect()
}
