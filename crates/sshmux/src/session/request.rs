//! Payloads of session channel requests

use bytes::Bytes;
use sshmux_protocol::{PayloadReader, PayloadWriter, ProtocolError};

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Size from the 32-bit wire fields, saturating at `u16::MAX`
    pub fn from_wire(cols: u32, rows: u32) -> Self {
        let clamp = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
        Self {
            rows: clamp(rows),
            cols: clamp(cols),
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// `pty-req`: allocate a pseudo-terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Value for `TERM`
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub width_px: u32,
    pub height_px: u32,
    /// Encoded terminal modes, passed through untouched
    pub modes: Bytes,
}

impl PtyRequest {
    /// Request a terminal of `size` with no pixel size or modes
    pub fn new(term: impl Into<String>, size: TerminalSize) -> Self {
        Self {
            term: term.into(),
            cols: u32::from(size.cols),
            rows: u32::from(size.rows),
            width_px: 0,
            height_px: 0,
            modes: Bytes::new(),
        }
    }

    /// Character-cell size
    pub fn size(&self) -> TerminalSize {
        TerminalSize::from_wire(self.cols, self.rows)
    }

    pub fn decode(data: Bytes) -> Result<Self, ProtocolError> {
        let mut reader = PayloadReader::new(data);
        Ok(Self {
            term: reader.read_utf8("term")?,
            cols: reader.read_u32()?,
            rows: reader.read_u32()?,
            width_px: reader.read_u32()?,
            height_px: reader.read_u32()?,
            modes: reader.read_string()?,
        })
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut writer = PayloadWriter::new();
        writer
            .put_string(&self.term)?
            .put_u32(self.cols)
            .put_u32(self.rows)
            .put_u32(self.width_px)
            .put_u32(self.height_px)
            .put_string(&self.modes)?;
        Ok(writer.finish())
    }
}

/// `window-change`: the client's terminal was resized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowChange {
    pub cols: u32,
    pub rows: u32,
    pub width_px: u32,
    pub height_px: u32,
}

impl WindowChange {
    /// Character-cell size
    pub fn size(&self) -> TerminalSize {
        TerminalSize::from_wire(self.cols, self.rows)
    }

    pub fn decode(data: Bytes) -> Result<Self, ProtocolError> {
        let mut reader = PayloadReader::new(data);
        Ok(Self {
            cols: reader.read_u32()?,
            rows: reader.read_u32()?,
            width_px: reader.read_u32()?,
            height_px: reader.read_u32()?,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::with_capacity(16);
        writer
            .put_u32(self.cols)
            .put_u32(self.rows)
            .put_u32(self.width_px)
            .put_u32(self.height_px);
        writer.finish()
    }
}

/// `exec`: run a command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: String,
}

impl ExecRequest {
    pub fn decode(data: Bytes) -> Result<Self, ProtocolError> {
        let mut reader = PayloadReader::new(data);
        Ok(Self {
            command: reader.read_utf8("command")?,
        })
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut writer = PayloadWriter::new();
        writer.put_string(&self.command)?;
        Ok(writer.finish())
    }
}

/// `subsystem`: start a named subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemRequest {
    pub name: String,
}

impl SubsystemRequest {
    pub fn decode(data: Bytes) -> Result<Self, ProtocolError> {
        let mut reader = PayloadReader::new(data);
        Ok(Self {
            name: reader.read_utf8("subsystem name")?,
        })
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut writer = PayloadWriter::new();
        writer.put_string(&self.name)?;
        Ok(writer.finish())
    }
}

/// `env`: set one environment variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvRequest {
    pub name: String,
    pub value: String,
}

impl EnvRequest {
    pub fn decode(data: Bytes) -> Result<Self, ProtocolError> {
        let mut reader = PayloadReader::new(data);
        Ok(Self {
            name: reader.read_utf8("variable name")?,
            value: reader.read_utf8("variable value")?,
        })
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut writer = PayloadWriter::new();
        writer.put_string(&self.name)?.put_string(&self.value)?;
        Ok(writer.finish())
    }
}

/// `exit-status`: the process exited with `code`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: u32,
}

impl ExitStatus {
    pub fn decode(data: Bytes) -> Result<Self, ProtocolError> {
        let mut reader = PayloadReader::new(data);
        Ok(Self {
            code: reader.read_u32()?,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::with_capacity(4);
        writer.put_u32(self.code);
        writer.finish()
    }
}
