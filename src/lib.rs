// Copyright 2026. The Fabric Project Contributors
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Reverse-RPC fabric: lets any server in a cluster dispatch unary or streaming calls to a
//! worker node connected to *any* server in the cluster, not just the one holding the socket.
//!
//! A worker dials out once and multiplexes logical streams over that single TCP connection.
//! Servers keep a [`registry::NodeConnRegistry`] of which workers they hold sessions for; a
//! [`locator::Locator`] lets a server that lacks a session ask its peers which one of them has
//! it; a [`dispatcher::Dispatcher`] opens substreams and speaks the mode-byte wire protocol; a
//! [`bridge`] splices an inbound client stream through to the worker's substream.

pub mod bridge;
pub mod clock;
pub mod config;
pub mod connpool;
pub mod dispatcher;
pub mod error;
pub mod locator;
pub mod peer;
pub mod registry;
pub mod session;
pub mod worker_id;

pub use bridge::bridge;
pub use clock::{Clock, SystemClock};
pub use config::FabricConfig;
pub use connpool::{ConnPool, ConnPoolError};
pub use dispatcher::{DispatchError, Dispatcher};
pub use error::FabricError;
pub use locator::{Locator, LocatorError};
pub use peer::{PeerDirectory, PeerServer};
pub use registry::{NodeConnRegistry, NodeConnState, RpcContext};
pub use session::{Session, SessionError, Substream};
pub use worker_id::WorkerId;
