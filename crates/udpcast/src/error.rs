// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for session operations.
//!
//! Three operational error families, with different blast radii:
//!
//! - [`BindError`] - fatal to the session instance; it must be discarded.
//! - [`JoinError`] - non-fatal; receiving continues without the membership.
//! - [`SendError`] - non-fatal; the periodic schedule continues.
//!
//! None of these propagate past the controller boundary - they are
//! converted to log lines or user notices there. Programming-level misuse
//! (double bind, double timer start) is not represented here at all: those
//! halt via assertions, because they indicate a controller defect rather
//! than an environmental condition.

use std::fmt;
use std::io;

/// The OS refused the bind (address in use, permission, invalid address).
///
/// Fatal to the attempted session instance: the session stays unusable and
/// must be discarded, never retried on the same instance.
#[derive(Debug)]
pub enum BindError {
    /// The bind address could not be applied to a socket at all.
    AddressInvalid(String),
    /// The OS-level bind (or a pre-bind socket option) failed.
    Os(io::Error),
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::AddressInvalid(addr) => write!(f, "invalid bind address: {}", addr),
            BindError::Os(err) => write!(f, "bind refused by OS: {}", err),
        }
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BindError::AddressInvalid(_) => None,
            BindError::Os(err) => Some(err),
        }
    }
}

impl From<io::Error> for BindError {
    fn from(err: io::Error) -> Self {
        BindError::Os(err)
    }
}

/// The multicast group join was rejected.
///
/// Non-fatal: the caller logs it and decides whether to continue receiving
/// without the membership.
#[derive(Debug)]
pub enum JoinError {
    /// The requested group is not a multicast address.
    NotMulticast(std::net::Ipv4Addr),
    /// The OS rejected the membership (duplicate join, interface mismatch).
    Os(io::Error),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::NotMulticast(addr) => {
                write!(f, "{} is not a multicast group address", addr)
            }
            JoinError::Os(err) => write!(f, "multicast join rejected: {}", err),
        }
    }
}

impl std::error::Error for JoinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JoinError::NotMulticast(_) => None,
            JoinError::Os(err) => Some(err),
        }
    }
}

/// A single transmission failed.
///
/// Non-fatal: logged per occurrence, the periodic schedule continues.
#[derive(Debug)]
pub enum SendError {
    /// Payload rejected before reaching the OS call.
    PayloadTooLarge {
        /// Offending payload length.
        len: usize,
        /// The enforced cap ([`crate::config::MAX_DATAGRAM_SIZE`]).
        max: usize,
    },
    /// The OS accepted fewer bytes than the payload length.
    ShortWrite {
        /// Bytes actually written.
        written: usize,
        /// Bytes expected.
        expected: usize,
    },
    /// The OS write failed outright.
    Os(io::Error),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::PayloadTooLarge { len, max } => {
                write!(f, "payload of {} bytes exceeds the {} byte cap", len, max)
            }
            SendError::ShortWrite { written, expected } => {
                write!(f, "short write: {} of {} bytes", written, expected)
            }
            SendError::Os(err) => write!(f, "send failed: {}", err),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SendError::Os(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SendError {
    fn from(err: io::Error) -> Self {
        SendError::Os(err)
    }
}
