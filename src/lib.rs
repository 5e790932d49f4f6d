//! # hubtun: a TUN broadcast hub over TCP
//!
//! **hubtun** joins several hosts into one virtual link. Every client exposes a
//! TUN device and keeps a single TCP connection to a relay; the relay forwards
//! whatever one client sends to all the other clients, much like a hub does on
//! a shared Ethernet segment.
//!
//! ## Key Features
//!
//! - **Simple framing**: packets travel as `MAGIC || LENGTH || PAYLOAD` frames
//!   (see [frame]), reassembled on the receiving side however TCP splits or
//!   merges them.
//! - **Frame-agnostic relay**: the relay never parses frames; it forwards raw
//!   chunks to every peer but the sender (see [relay]).
//! - **Independent pumps**: each client runs one task per direction, so a
//!   failure in one direction leaves the other working (see [client]).
//! - **Asynchronous I/O with Tokio**: every connection and pump is a task, and
//!   a single cancellation token stops them all.
//!
//! ## How It Works
//! 1. **Relay**: `hubtun relay` listens on TCP port 9621 and registers every
//!    client that connects.
//! 2. **Client**: `hubtun client --server <host>` opens a TUN device and
//!    connects to the relay.
//! 3. **Traffic**: packets read from a client's TUN device are framed, sent to
//!    the relay, broadcast to the other clients and written to their TUN
//!    devices.
//!
//! ## Warning
//!
//! Traffic is neither encrypted nor authenticated, and there is no routing:
//! every client sees every packet. Use it on networks you trust.

pub mod actors;
pub mod client;
pub mod common;
pub mod error;
pub mod frame;
pub mod relay;
