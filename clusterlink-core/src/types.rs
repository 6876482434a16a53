//! Wire types for the shard ⇄ aggregator opcode protocol
//!
//! Every frame on the socket is an [`Envelope`]: a JSON object with an
//! integer `op` and an arbitrary `d` payload. The opcode space is closed
//! (see [`OpCode`]); the payload shape depends on the opcode.
//!
//! | op | direction | name                  | payload                                  |
//! |----|-----------|-----------------------|------------------------------------------|
//! | 0  | in        | HELLO                 | `{heartbeatIntervalMs}`                  |
//! | 1  | in        | READY_ACK             | none                                     |
//! | 2  | out       | IDENTIFY              | `{token, clusterCount, clusterID}`       |
//! | 3  | out       | STATS                 | `{guildCount, cpuUsage, memUsage, ping}` |
//! | 4  | in        | SEND_ACK              | none                                     |
//! | 5  | out       | LOG                   | string                                   |
//! | 6  | out       | ERROR                 | string                                   |
//! | 7  | in        | CLUSTER_DATA_UPDATE   | object                                   |
//! | 8  | in        | CLUSTER_STATUS_UPDATE | boolean-ish                              |
//! | 9  | both      | REMOTE_EVAL           | `{id, data, uid}`                        |

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// WebSocket close codes used by the client
pub mod close_code {
    /// Explicit, consumer-initiated disconnect
    pub const NORMAL_CLOSURE: u16 = 1000;
    /// Close frame received without a status code
    pub const NO_STATUS: u16 = 1005;
    /// Socket dropped or failed without a close frame
    pub const ABNORMAL_CLOSURE: u16 = 1006;
    /// Unknown or out-of-sequence opcode
    pub const PROTOCOL_ERROR: u16 = 4001;
}

/// The closed set of protocol opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Hello,
    ReadyAck,
    Identify,
    Stats,
    SendAck,
    Log,
    Error,
    ClusterDataUpdate,
    ClusterStatusUpdate,
    RemoteEval,
}

impl OpCode {
    /// Every opcode, in wire order
    pub const ALL: [OpCode; 10] = [
        OpCode::Hello,
        OpCode::ReadyAck,
        OpCode::Identify,
        OpCode::Stats,
        OpCode::SendAck,
        OpCode::Log,
        OpCode::Error,
        OpCode::ClusterDataUpdate,
        OpCode::ClusterStatusUpdate,
        OpCode::RemoteEval,
    ];

    /// Integer value on the wire
    pub fn code(self) -> u64 {
        match self {
            OpCode::Hello => 0,
            OpCode::ReadyAck => 1,
            OpCode::Identify => 2,
            OpCode::Stats => 3,
            OpCode::SendAck => 4,
            OpCode::Log => 5,
            OpCode::Error => 6,
            OpCode::ClusterDataUpdate => 7,
            OpCode::ClusterStatusUpdate => 8,
            OpCode::RemoteEval => 9,
        }
    }

    /// Protocol name, as used in logs and metric attributes
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Hello => "HELLO",
            OpCode::ReadyAck => "READY_ACK",
            OpCode::Identify => "IDENTIFY",
            OpCode::Stats => "STATS",
            OpCode::SendAck => "SEND_ACK",
            OpCode::Log => "LOG",
            OpCode::Error => "ERROR",
            OpCode::ClusterDataUpdate => "CLUSTER_DATA_UPDATE",
            OpCode::ClusterStatusUpdate => "CLUSTER_STATUS_UPDATE",
            OpCode::RemoteEval => "REMOTE_EVAL",
        }
    }

    /// Whether the aggregator may send this opcode to a shard
    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            OpCode::Hello
                | OpCode::ReadyAck
                | OpCode::SendAck
                | OpCode::ClusterDataUpdate
                | OpCode::ClusterStatusUpdate
                | OpCode::RemoteEval
        )
    }

    /// Whether the opcode belongs to the HELLO → READY_ACK handshake
    pub fn is_handshake(self) -> bool {
        matches!(self, OpCode::Hello | OpCode::ReadyAck)
    }
}

impl TryFrom<u64> for OpCode {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        OpCode::ALL
            .into_iter()
            .find(|op| op.code() == value)
            .ok_or_else(|| Error::ProtocolViolation(format!("unknown opcode {}", value)))
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// The `{op, d}` wire unit
///
/// `op` is kept as a raw integer so that frames with unknown opcodes still
/// decode; [`Envelope::opcode`] maps it into the closed enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u64,
    #[serde(default)]
    pub d: Value,
}

impl Envelope {
    /// Create an envelope for a known opcode
    pub fn new(op: OpCode, d: Value) -> Self {
        Self { op: op.code(), d }
    }

    /// Map the raw `op` into an [`OpCode`]
    pub fn opcode(&self) -> Result<OpCode> {
        OpCode::try_from(self.op)
    }

    /// Deserialize the `d` payload into a typed value
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.d).map_err(|e| {
            Error::MalformedMessage(format!("invalid payload for op {}: {}", self.op, e))
        })
    }
}

/// Identity a shard presents during the handshake
///
/// Immutable once built. Serializes as the IDENTIFY payload. `Debug`
/// output never includes the token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    token: String,
    #[serde(rename = "clusterID")]
    cluster_id: u32,
    #[serde(rename = "clusterCount")]
    cluster_count: u32,
}

impl ClientIdentity {
    pub fn new(token: impl Into<String>, cluster_id: u32, cluster_count: u32) -> Self {
        Self {
            token: token.into(),
            cluster_id,
            cluster_count,
        }
    }

    /// Build an identity from untyped values, coercing the ids to integers
    ///
    /// # Errors
    ///
    /// `Error::InvalidArgument` if either id is not a non-negative integer.
    pub fn parse(token: impl Into<String>, cluster_id: &str, cluster_count: &str) -> Result<Self> {
        let cluster_id = parse_id("cluster_id", cluster_id)?;
        let cluster_count = parse_id("cluster_count", cluster_count)?;
        Ok(Self::new(token, cluster_id, cluster_count))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn cluster_id(&self) -> u32 {
        self.cluster_id
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }
}

fn parse_id(field: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| Error::InvalidArgument(format!("{} must be an integer, got {:?}", field, raw)))
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("token", &"<redacted>")
            .field("cluster_id", &self.cluster_id)
            .field("cluster_count", &self.cluster_count)
            .finish()
    }
}

/// HELLO payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    #[serde(
        rename = "heartbeatIntervalMs",
        alias = "heartbeatInterval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub heartbeat_interval_ms: Option<u64>,
}

/// STATS payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub guild_count: u64,
    pub cpu_usage: f64,
    pub mem_usage: f64,
    pub ping: f64,
}

impl StatsReport {
    /// Build a stats report, rejecting values JSON cannot represent
    ///
    /// # Errors
    ///
    /// `Error::InvalidArgument` naming the first non-finite field.
    pub fn new(guild_count: u64, cpu_usage: f64, mem_usage: f64, ping: f64) -> Result<Self> {
        for (field, value) in [("cpu_usage", cpu_usage), ("mem_usage", mem_usage), ("ping", ping)] {
            if !value.is_finite() {
                return Err(Error::InvalidArgument(format!(
                    "{} must be a finite number, got {}",
                    field, value
                )));
            }
        }
        Ok(Self {
            guild_count,
            cpu_usage,
            mem_usage,
            ping,
        })
    }
}

/// REMOTE_EVAL payload, used for both requests and replies
///
/// `id` is the target cluster on a request and is echoed back on the reply;
/// `uid` correlates the two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvalPayload {
    pub id: u32,
    pub uid: u64,
    #[serde(default)]
    pub data: Value,
}
