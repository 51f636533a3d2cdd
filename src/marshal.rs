// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 marshalling/unmarshalling utilities
//!
//! Big-endian wire encoding for TPM command parameters and response fields.

use crate::error::{ToolError, ToolResult};

/// Buffer for building TPM commands
#[derive(Debug, Default)]
pub struct CommandBuffer {
    data: Vec<u8>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Put a TPM2B structure (2-byte size prefix + data)
    pub fn put_tpm2b(&mut self, data: &[u8]) {
        self.put_u16(data.len() as u16);
        self.put_bytes(data);
    }

    /// Put an empty TPM2B structure
    pub fn put_tpm2b_empty(&mut self) {
        self.put_u16(0);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Update a u32 at a specific position (for size fields)
    pub fn update_u32(&mut self, pos: usize, v: u32) {
        self.data[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
    }
}

/// Buffer for parsing TPM responses
#[derive(Debug)]
pub struct ResponseBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ResponseBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn underflow(what: &str) -> ToolError {
        ToolError::Parse(format!("buffer underflow reading {what}"))
    }

    pub fn get_u8(&mut self) -> ToolResult<u8> {
        if self.pos >= self.data.len() {
            return Err(Self::underflow("u8"));
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn get_u16(&mut self) -> ToolResult<u16> {
        if self.pos + 2 > self.data.len() {
            return Err(Self::underflow("u16"));
        }
        let v = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn get_u32(&mut self) -> ToolResult<u32> {
        if self.pos + 4 > self.data.len() {
            return Err(Self::underflow("u32"));
        }
        let v = u32::from_be_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(v)
    }

    pub fn get_bytes(&mut self, len: usize) -> ToolResult<Vec<u8>> {
        if self.pos + len > self.data.len() {
            return Err(ToolError::Parse(format!(
                "buffer underflow reading {} bytes (remaining: {})",
                len,
                self.remaining()
            )));
        }
        let v = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(v)
    }

    /// Get a TPM2B structure (2-byte size prefix + data)
    pub fn get_tpm2b(&mut self) -> ToolResult<Vec<u8>> {
        let size = self.get_u16()? as usize;
        self.get_bytes(size)
    }

    /// Get remaining bytes
    pub fn get_remaining(&mut self) -> Vec<u8> {
        let v = self.data[self.pos..].to_vec();
        self.pos = self.data.len();
        v
    }

    /// Skip bytes
    pub fn skip(&mut self, len: usize) -> ToolResult<()> {
        if self.pos + len > self.data.len() {
            return Err(ToolError::Parse(format!(
                "buffer underflow skipping {len} bytes"
            )));
        }
        self.pos += len;
        Ok(())
    }
}

/// Trait for types that can be marshalled to TPM format
pub trait Marshal {
    fn marshal(&self, buf: &mut CommandBuffer);

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = CommandBuffer::new();
        self.marshal(&mut buf);
        buf.into_vec()
    }
}

/// Trait for types that can be unmarshalled from TPM format
pub trait Unmarshal: Sized {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self>;

    fn from_bytes(data: &[u8]) -> ToolResult<Self> {
        let mut buf = ResponseBuffer::new(data);
        Self::unmarshal(&mut buf)
    }
}

impl Marshal for u8 {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u8(*self);
    }
}

impl Marshal for u16 {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(*self);
    }
}

impl Marshal for u32 {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(*self);
    }
}

impl Unmarshal for u8 {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        buf.get_u8()
    }
}

impl Unmarshal for u16 {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        buf.get_u16()
    }
}

impl Unmarshal for u32 {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        buf.get_u32()
    }
}
