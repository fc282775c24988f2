//! Protocol data model: data-point identifiers, averaging selectors,
//! controller commands and the known-point descriptor table.

use serde::{Deserialize, Serialize};

use mnet_comlink::error::{MnetError, Result};

// ============================================================================
// Data identifiers
// ============================================================================

/// Identifier of a controller data point (the main-id word).
///
/// On the wire an item is `main:u16 BE || sub:u16 BE`; the sub word carries
/// the averaging code, a stack index, or a fixed constant depending on the
/// point family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataId(pub u16);

impl DataId {
    /// Wire bytes of one request item for this id with the given sub word.
    pub fn wire_item(self, sub: u16) -> [u8; 4] {
        let main = self.0.to_be_bytes();
        let sub = sub.to_be_bytes();
        [main[0], main[1], sub[0], sub[1]]
    }
}

impl std::fmt::Display for DataId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Turbine serial number as retrieved from the controller (4 raw bytes,
/// big-endian), the seed of the obfuscation key schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialNumber(pub [u8; 4]);

impl SerialNumber {
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl std::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

// ============================================================================
// Averaging selectors
// ============================================================================

/// Time window over which a data point's value is reported.
///
/// Sent as the sub word of a request item. Not every window is valid for
/// every point; the controller rejects invalid combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Averaging {
    Current,
    Avg20Ms,
    Avg100Ms,
    Avg1S,
    Avg30S,
    Avg1Min,
    Avg10Min,
    Avg30Min,
    Avg1Hr,
    Avg24Hr,
}

impl Averaging {
    /// Wire code carried in the request item's sub word
    pub fn code(self) -> u16 {
        match self {
            Averaging::Current => 0,
            Averaging::Avg20Ms => 1,
            Averaging::Avg100Ms => 2,
            Averaging::Avg1S => 3,
            Averaging::Avg30S => 4,
            Averaging::Avg1Min => 5,
            Averaging::Avg10Min => 6,
            Averaging::Avg30Min => 7,
            Averaging::Avg1Hr => 8,
            Averaging::Avg24Hr => 9,
        }
    }
}

impl std::fmt::Display for Averaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Averaging::Current => "current",
            Averaging::Avg20Ms => "20ms",
            Averaging::Avg100Ms => "100ms",
            Averaging::Avg1S => "1s",
            Averaging::Avg30S => "30s",
            Averaging::Avg1Min => "1min",
            Averaging::Avg10Min => "10min",
            Averaging::Avg30Min => "30min",
            Averaging::Avg1Hr => "1hr",
            Averaging::Avg24Hr => "24hr",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Averaging {
    type Err = MnetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "current" | "now" => Ok(Averaging::Current),
            "20ms" => Ok(Averaging::Avg20Ms),
            "100ms" => Ok(Averaging::Avg100Ms),
            "1s" => Ok(Averaging::Avg1S),
            "30s" => Ok(Averaging::Avg30S),
            "1min" => Ok(Averaging::Avg1Min),
            "10min" => Ok(Averaging::Avg10Min),
            "30min" => Ok(Averaging::Avg30Min),
            "1hr" | "1h" => Ok(Averaging::Avg1Hr),
            "24hr" | "24h" => Ok(Averaging::Avg24Hr),
            other => Err(MnetError::config(format!("unknown averaging: {other}"))),
        }
    }
}

// ============================================================================
// Controller commands
// ============================================================================

/// Operational commands written to the controller's command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Start,
    Stop,
    Reset,
    ManualStart,
}

impl Command {
    /// Value written to the command register
    pub fn code(self) -> u32 {
        match self {
            Command::Start => 1,
            Command::Stop => 2,
            Command::Reset => 3,
            Command::ManualStart => 4,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Reset => "reset",
            Command::ManualStart => "manual-start",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Command {
    type Err = MnetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "reset" => Ok(Command::Reset),
            "manual-start" | "manualstart" => Ok(Command::ManualStart),
            other => Err(MnetError::config(format!("unknown command: {other}"))),
        }
    }
}

// ============================================================================
// Known data points
// ============================================================================

/// Decode family a point's replies dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    /// Generic numeric with header-driven scaling
    Analog,
    /// Grid power: raw arrives in 100 W units, reported as watts
    GridPower,
    /// Two u16 status codes
    StatusPair,
    /// Monotonic runtime/production counter
    Counter,
    /// Controller wall clock (epoch 1980)
    Time,
    /// Event stack entry, sub word is the stack index
    EventStack,
}

/// Static description of a known controller data point.
#[derive(Debug, Clone, Copy)]
pub struct PointDescriptor {
    pub id: DataId,
    pub name: &'static str,
    pub kind: PointKind,
    /// Averaging windows the controller accepts for this point
    pub averagings: &'static [Averaging],
}

const CURRENT_ONLY: &[Averaging] = &[Averaging::Current];
const ELECTRICAL: &[Averaging] = &[
    Averaging::Current,
    Averaging::Avg1S,
    Averaging::Avg30S,
    Averaging::Avg1Min,
    Averaging::Avg10Min,
    Averaging::Avg30Min,
    Averaging::Avg1Hr,
    Averaging::Avg24Hr,
];
const MECHANICAL: &[Averaging] = &[
    Averaging::Current,
    Averaging::Avg1S,
    Averaging::Avg1Min,
    Averaging::Avg10Min,
];

pub mod points {
    use super::DataId;

    pub const WIND_SPEED: DataId = DataId(0x9C43);
    pub const ROTOR_RPM: DataId = DataId(0x9C46);
    pub const GENERATOR_RPM: DataId = DataId(0x9C47);
    pub const GRID_VOLTAGE: DataId = DataId(0x9CA4);
    pub const L1_VOLTAGE: DataId = DataId(0x9CA5);
    pub const L2_VOLTAGE: DataId = DataId(0x9CA6);
    pub const L3_VOLTAGE: DataId = DataId(0x9CA7);
    pub const GRID_CURRENT: DataId = DataId(0x9CA8);
    pub const L1_CURRENT: DataId = DataId(0x9CA9);
    pub const L2_CURRENT: DataId = DataId(0x9CAA);
    pub const L3_CURRENT: DataId = DataId(0x9CAB);
    pub const GRID_POWER: DataId = DataId(0x9CAC);
    pub const GRID_VAR: DataId = DataId(0x9CAD);
    pub const SYSTEM_PRODUCTION: DataId = DataId(0x80E9);
    pub const G1_PRODUCTION: DataId = DataId(0x80EA);
    pub const CONTROLLER_TIME: DataId = DataId(0xC353);
    pub const CURRENT_STATUS: DataId = DataId(0x000C);
    pub const EVENT_STACK: DataId = DataId(0x000B);
    /// Command register written by `send_command`
    pub const COMMAND: DataId = DataId(0x0000);

    /// Sub word used by the controller-time write item
    pub const TIME_WRITE_SUB: u16 = 0x0001;
}

static POINT_TABLE: &[PointDescriptor] = &[
    PointDescriptor {
        id: points::WIND_SPEED,
        name: "wind-speed",
        kind: PointKind::Analog,
        averagings: MECHANICAL,
    },
    PointDescriptor {
        id: points::ROTOR_RPM,
        name: "rotor-rpm",
        kind: PointKind::Analog,
        averagings: MECHANICAL,
    },
    PointDescriptor {
        id: points::GENERATOR_RPM,
        name: "generator-rpm",
        kind: PointKind::Analog,
        averagings: MECHANICAL,
    },
    PointDescriptor {
        id: points::GRID_VOLTAGE,
        name: "grid-voltage",
        kind: PointKind::Analog,
        averagings: ELECTRICAL,
    },
    PointDescriptor {
        id: points::L1_VOLTAGE,
        name: "l1-voltage",
        kind: PointKind::Analog,
        averagings: ELECTRICAL,
    },
    PointDescriptor {
        id: points::L2_VOLTAGE,
        name: "l2-voltage",
        kind: PointKind::Analog,
        averagings: ELECTRICAL,
    },
    PointDescriptor {
        id: points::L3_VOLTAGE,
        name: "l3-voltage",
        kind: PointKind::Analog,
        averagings: ELECTRICAL,
    },
    PointDescriptor {
        id: points::GRID_CURRENT,
        name: "grid-current",
        kind: PointKind::Analog,
        averagings: ELECTRICAL,
    },
    PointDescriptor {
        id: points::L1_CURRENT,
        name: "l1-current",
        kind: PointKind::Analog,
        averagings: ELECTRICAL,
    },
    PointDescriptor {
        id: points::L2_CURRENT,
        name: "l2-current",
        kind: PointKind::Analog,
        averagings: ELECTRICAL,
    },
    PointDescriptor {
        id: points::L3_CURRENT,
        name: "l3-current",
        kind: PointKind::Analog,
        averagings: ELECTRICAL,
    },
    PointDescriptor {
        id: points::GRID_POWER,
        name: "grid-power",
        kind: PointKind::GridPower,
        averagings: ELECTRICAL,
    },
    PointDescriptor {
        id: points::GRID_VAR,
        name: "grid-var",
        kind: PointKind::Analog,
        averagings: ELECTRICAL,
    },
    PointDescriptor {
        id: points::SYSTEM_PRODUCTION,
        name: "system-production",
        kind: PointKind::Counter,
        averagings: CURRENT_ONLY,
    },
    PointDescriptor {
        id: points::G1_PRODUCTION,
        name: "g1-production",
        kind: PointKind::Counter,
        averagings: CURRENT_ONLY,
    },
    PointDescriptor {
        id: points::CONTROLLER_TIME,
        name: "controller-time",
        kind: PointKind::Time,
        averagings: CURRENT_ONLY,
    },
    PointDescriptor {
        id: points::CURRENT_STATUS,
        name: "current-status",
        kind: PointKind::StatusPair,
        averagings: CURRENT_ONLY,
    },
    PointDescriptor {
        id: points::EVENT_STACK,
        name: "event-stack",
        kind: PointKind::EventStack,
        averagings: CURRENT_ONLY,
    },
];

/// Look up a descriptor by data id.
pub fn descriptor(id: DataId) -> Option<&'static PointDescriptor> {
    POINT_TABLE.iter().find(|p| p.id == id)
}

/// Look up a descriptor by its CLI-facing name.
pub fn descriptor_by_name(name: &str) -> Option<&'static PointDescriptor> {
    POINT_TABLE.iter().find(|p| p.name == name)
}

/// All known points, for listings.
pub fn known_points() -> &'static [PointDescriptor] {
    POINT_TABLE
}
