// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! VITA-49 common header.
//!
//! ```text
//!  31   28 27 26  24 23 22 21 20 19  16 15                0
//! +-------+--+------+-----+-----+------+-------------------+
//! | type  |C | rsvd | TSI | TSF |count |  size (words)     |
//! +-------+--+------+-----+-----+------+-------------------+
//! |                    stream id                           |
//! +--------------------------------------------------------+
//! | rsvd  |              OUI (24 bits)                     |
//! +--------------------------------------------------------+
//! |   information class     |     packet class             |
//! +--------------------------------------------------------+
//! |        integer timestamp (if TSI != 0)                 |
//! +--------------------------------------------------------+
//! |        fractional timestamp (2 words, if TSF != 0)     |
//! +--------------------------------------------------------+
//! ```
//!
//! Only the sample-count fractional mode is supported.

use crate::mbuf::Mbuf;

use super::Vita49Error;

/// Organization identifier of the platform.
pub const OUI: u32 = 0x0012_A2;

/// Information class (high half) and packet class (low half).
pub const CLASS_CODE: u32 = 0x5652_4D01;

/// Smallest valid packet: header, stream id and class id.
pub const MIN_LEN: usize = 16;

/// Largest packet expressible in the 16-bit size field.
pub const MAX_WORDS: usize = 0xFFFF;

/// Packet type field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PacketType {
    #[default]
    Context,
    Command,
}

impl PacketType {
    pub fn code(self) -> u32 {
        match self {
            PacketType::Context => 4,
            PacketType::Command => 6,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            4 => Some(PacketType::Context),
            6 => Some(PacketType::Command),
            _ => None,
        }
    }
}

/// Integer timestamp mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tsi {
    #[default]
    None,
    Utc,
    Gps,
    Other,
}

impl Tsi {
    fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Tsi::None,
            1 => Tsi::Utc,
            2 => Tsi::Gps,
            _ => Tsi::Other,
        }
    }

    fn bits(self) -> u32 {
        self as u32
    }
}

/// Fractional timestamp mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tsf {
    #[default]
    None,
    SampleCount,
    RealTime,
    FreeRunning,
}

impl Tsf {
    fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Tsf::None,
            1 => Tsf::SampleCount,
            2 => Tsf::RealTime,
            _ => Tsf::FreeRunning,
        }
    }

    fn bits(self) -> u32 {
        self as u32
    }
}

/// Decoded common header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub packet_type: PacketType,
    pub tsi: Tsi,
    pub tsf: Tsf,
    /// Sequence count; only the low 4 bits travel on the wire.
    pub count: u16,
    /// Packet size in 32-bit words, header included.
    pub size: u16,
    pub stream_id: u32,
    pub integer_ts: u32,
    pub fractional_ts: u64,
}

impl Header {
    /// Decode the header at `cur`.
    ///
    /// On success `end` is trimmed to the declared packet size and `cur`
    /// points at the first payload word.
    pub(crate) fn decode<U>(&mut self, mbuf: &mut Mbuf<U>) -> Result<(), Vita49Error> {
        let start = mbuf.cur();
        let available = mbuf.available();
        if available < MIN_LEN {
            return Err(Vita49Error::Short {
                len: available,
                min: MIN_LEN,
            });
        }

        let word = mbuf.get_be32()?;
        let packet_type = PacketType::from_code(word >> 28).ok_or(Vita49Error::BadType(word >> 28))?;
        if word & (1 << 27) == 0 {
            return Err(Vita49Error::BadClassId(0));
        }
        let size = (word & 0xFFFF) as usize;
        if size * 4 > available {
            return Err(Vita49Error::Oversize {
                declared: size * 4,
                available,
            });
        }
        if size * 4 < MIN_LEN {
            return Err(Vita49Error::Short {
                len: size * 4,
                min: MIN_LEN,
            });
        }
        mbuf.set_end(start + size * 4)?;

        self.packet_type = packet_type;
        self.tsi = Tsi::from_bits(word >> 22);
        self.tsf = Tsf::from_bits(word >> 20);
        self.count = ((word >> 16) & 0xF) as u16;
        self.size = size as u16;
        self.stream_id = mbuf.get_be32()?;

        let oui = mbuf.get_be32()? & 0x00FF_FFFF;
        let class = mbuf.get_be32()?;
        if oui != OUI || class != CLASS_CODE {
            return Err(Vita49Error::BadClassId(((oui as u64) << 32) | class as u64));
        }

        if self.tsi != Tsi::None {
            self.integer_ts = mbuf.get_be32().map_err(|_| Vita49Error::overrun("integer timestamp"))?;
        }
        match self.tsf {
            Tsf::None => {}
            Tsf::SampleCount => {
                self.fractional_ts = mbuf
                    .get_be64()
                    .map_err(|_| Vita49Error::overrun("fractional timestamp"))?;
            }
            mode => return Err(Vita49Error::UnsupportedTsf(mode.bits() as u8)),
        }
        Ok(())
    }

    /// Encode the header at `cur` with a zero size field.
    ///
    /// Returns the header word so the caller can patch the size in.
    pub(crate) fn encode<U>(&self, mbuf: &mut Mbuf<U>) -> Result<u32, Vita49Error> {
        if matches!(self.tsf, Tsf::RealTime | Tsf::FreeRunning) {
            return Err(Vita49Error::UnsupportedTsf(self.tsf.bits() as u8));
        }
        let word = (self.packet_type.code() << 28)
            | (1 << 27)
            | (self.tsi.bits() << 22)
            | (self.tsf.bits() << 20)
            | ((self.count as u32 & 0xF) << 16);
        mbuf.set_be32(word)?;
        mbuf.set_be32(self.stream_id)?;
        mbuf.set_be32(OUI)?;
        mbuf.set_be32(CLASS_CODE)?;
        if self.tsi != Tsi::None {
            mbuf.set_be32(self.integer_ts)?;
        }
        if self.tsf == Tsf::SampleCount {
            mbuf.set_be64(self.fractional_ts)?;
        }
        Ok(word)
    }
}
