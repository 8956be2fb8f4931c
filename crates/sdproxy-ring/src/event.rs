use core::fmt;

/// Maximum payload text stored inline in a record.
pub const PAYLOAD_CAPACITY: usize = 40;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Consumer-side marker for a processed record; never published by the bridge itself.
    Done = 0,
    /// Free-form text.
    Debug = 1,
    /// Free-form text followed by `extra`.
    DebugWithValue = 2,
    /// Capacity query; `extra` is the size in bytes.
    GetSize = 3,
    /// Sector read queued; `extra` is the sector number.
    ReadSector = 4,
    /// Sector write queued; `extra` is the sector number.
    WriteSector = 5,
    /// Command loop armed; `extra` is the CPU it runs on.
    Started = 6,
    /// New command seen; `extra` is the command index.
    CommandReceived = 7,
    /// Response written and acknowledged; `extra` is the command index.
    CommandProcessed = 8,
    /// Response transmission finished; `extra` is the raw STATUS word.
    CommandComplete = 9,
    /// Completion noticed late; `extra` is the delay in cycles.
    SlowCompletion = 10,
    /// Protocol engine had no response to send; `extra` is the command index.
    NoResponse = 11,
    /// Protocol engine produced an illegal response length; `extra` is the length.
    BadResponseLength = 12,
    /// Protocol engine refused the command; `extra` is the command index.
    ProtocolEngineError = 13,
}

impl EventKind {
    pub const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Done,
            1 => Self::Debug,
            2 => Self::DebugWithValue,
            3 => Self::GetSize,
            4 => Self::ReadSector,
            5 => Self::WriteSector,
            6 => Self::Started,
            7 => Self::CommandReceived,
            8 => Self::CommandProcessed,
            9 => Self::CommandComplete,
            10 => Self::SlowCompletion,
            11 => Self::NoResponse,
            12 => Self::BadResponseLength,
            13 => Self::ProtocolEngineError,
            _ => return None,
        })
    }

    /// Whether the record reports a condition an operator should look at.
    pub const fn is_warning(self) -> bool {
        matches!(
            self,
            Self::SlowCompletion | Self::BadResponseLength | Self::ProtocolEngineError
        )
    }
}

/// Short UTF-8 text stored inline in a ring slot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EventPayload {
    len: u8,
    bytes: [u8; PAYLOAD_CAPACITY],
}

impl EventPayload {
    pub const EMPTY: Self = Self {
        len: 0,
        bytes: [0; PAYLOAD_CAPACITY],
    };

    /// Copy `text`, truncated to [`PAYLOAD_CAPACITY`] bytes on a character boundary.
    pub fn new(text: &str) -> Self {
        let mut end = text.len().min(PAYLOAD_CAPACITY);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; PAYLOAD_CAPACITY];
        bytes[..end].copy_from_slice(&text.as_bytes()[..end]);
        Self {
            len: end as u8,
            bytes,
        }
    }

    pub(crate) fn from_raw(len: u8, bytes: [u8; PAYLOAD_CAPACITY]) -> Self {
        Self {
            len: len.min(PAYLOAD_CAPACITY as u8),
            bytes,
        }
    }

    pub(crate) fn raw_bytes(&self) -> &[u8; PAYLOAD_CAPACITY] {
        &self.bytes
    }

    pub fn as_str(&self) -> &str {
        // Only ever filled from a `&str` cut on a char boundary; a torn slot is discarded
        // before it is turned into a payload.
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for EventPayload {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub kind: EventKind,
    pub payload: EventPayload,
    pub extra: u64,
    /// Monotonic timestamp in nanoseconds, on the producer's clock.
    pub timestamp: u64,
}

impl EventRecord {
    pub fn new(kind: EventKind, payload: &str, extra: u64, timestamp: u64) -> Self {
        Self {
            kind,
            payload: EventPayload::new(payload),
            extra,
            timestamp,
        }
    }
}
