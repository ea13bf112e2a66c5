// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Context payload.
//!
//! A single indicator word (CIF0 layout) gates the optional fields that
//! follow, in descending bit order. Fields the manager has no use for are
//! still consumed so the cursor stays aligned, but their values are dropped.

use crate::mbuf::Mbuf;

use super::fixed::{
    from_fixed16, from_fixed64, to_fixed16, to_fixed64, FREQ_RADIX, LEVEL_RADIX, TEMP_RADIX,
};
use super::Vita49Error;

/// Field indicator bits.
pub mod indicator {
    pub const CHANGE: u32 = 1 << 31;
    pub const REF_POINT: u32 = 1 << 30;
    pub const BANDWIDTH: u32 = 1 << 29;
    pub const IF_REF_FREQ: u32 = 1 << 28;
    pub const RF_REF_FREQ: u32 = 1 << 27;
    pub const RF_FREQ_OFFSET: u32 = 1 << 26;
    pub const IF_BAND_OFFSET: u32 = 1 << 25;
    pub const REF_LEVEL: u32 = 1 << 24;
    pub const GAIN: u32 = 1 << 23;
    pub const OVER_RANGE: u32 = 1 << 22;
    pub const SAMPLE_RATE: u32 = 1 << 21;
    pub const TS_ADJUST: u32 = 1 << 20;
    pub const TS_CALIBRATION: u32 = 1 << 19;
    pub const TEMPERATURE: u32 = 1 << 18;
    pub const DEVICE_ID: u32 = 1 << 17;
    pub const STATE_EVENT: u32 = 1 << 16;
    pub const PAYLOAD_FORMAT: u32 = 1 << 15;
    pub const GPS: u32 = 1 << 14;
    pub const INS: u32 = 1 << 13;
    pub const ECEF_EPHEMERIS: u32 = 1 << 12;
    pub const REL_EPHEMERIS: u32 = 1 << 11;
    pub const EPHEMERIS_REF: u32 = 1 << 10;
    pub const GPS_ASCII: u32 = 1 << 9;
    pub const ASSOC_LISTS: u32 = 1 << 8;

    /// Fields whose values are kept.
    pub const KEPT: u32 =
        BANDWIDTH | IF_REF_FREQ | RF_REF_FREQ | REF_LEVEL | GAIN | SAMPLE_RATE | TEMPERATURE;

    /// Bits below the last defined field.
    pub const RESERVED: u32 = 0xFF;
}

/// Fixed-size fields consumed and dropped, with their size in words.
const DISCARDED: [(u32, usize, &str); 14] = [
    (indicator::REF_POINT, 1, "reference point"),
    (indicator::RF_FREQ_OFFSET, 2, "rf frequency offset"),
    (indicator::IF_BAND_OFFSET, 2, "if band offset"),
    (indicator::OVER_RANGE, 1, "over-range count"),
    (indicator::TS_ADJUST, 2, "timestamp adjustment"),
    (indicator::TS_CALIBRATION, 1, "timestamp calibration"),
    (indicator::DEVICE_ID, 2, "device id"),
    (indicator::STATE_EVENT, 1, "state and event"),
    (indicator::PAYLOAD_FORMAT, 2, "payload format"),
    (indicator::GPS, 11, "gps"),
    (indicator::INS, 11, "ins"),
    (indicator::ECEF_EPHEMERIS, 13, "ecef ephemeris"),
    (indicator::REL_EPHEMERIS, 13, "relative ephemeris"),
    (indicator::EPHEMERIS_REF, 1, "ephemeris reference"),
];

/// Decoded context payload. Values are in Hz, dB and degrees Celsius.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Context {
    pub indicator: u32,
    pub bandwidth: f64,
    pub if_ref_freq: f64,
    pub rf_ref_freq: f64,
    pub ref_level: f64,
    pub gain_stage1: f64,
    pub gain_stage2: f64,
    pub sample_rate: f64,
    pub temperature: f64,
}

impl Context {
    pub fn has(&self, bit: u32) -> bool {
        self.indicator & bit != 0
    }

    pub(crate) fn decode<U>(&mut self, mbuf: &mut Mbuf<U>) -> Result<(), Vita49Error> {
        need(mbuf, 1, "context indicator")?;
        let bits = mbuf.get_be32()?;
        if bits & indicator::RESERVED != 0 {
            return Err(Vita49Error::BadField("context indicator"));
        }
        self.indicator |= bits;

        // Fields in wire order; discarded ones are skipped in place.
        for bit in (8..31).rev().map(|n| 1u32 << n) {
            if bits & bit == 0 {
                continue;
            }
            match bit {
                indicator::BANDWIDTH => self.bandwidth = get_freq(mbuf, "bandwidth")?,
                indicator::IF_REF_FREQ => self.if_ref_freq = get_freq(mbuf, "if reference")?,
                indicator::RF_REF_FREQ => self.rf_ref_freq = get_freq(mbuf, "rf reference")?,
                indicator::REF_LEVEL => {
                    need(mbuf, 1, "reference level")?;
                    self.ref_level = from_fixed16(mbuf.get_be32()? as u16, LEVEL_RADIX);
                }
                indicator::GAIN => {
                    need(mbuf, 1, "gain")?;
                    let word = mbuf.get_be32()?;
                    self.gain_stage2 = from_fixed16((word >> 16) as u16, LEVEL_RADIX);
                    self.gain_stage1 = from_fixed16(word as u16, LEVEL_RADIX);
                }
                indicator::SAMPLE_RATE => self.sample_rate = get_freq(mbuf, "sample rate")?,
                indicator::TEMPERATURE => {
                    need(mbuf, 1, "temperature")?;
                    self.temperature = from_fixed16(mbuf.get_be32()? as u16, TEMP_RADIX);
                }
                indicator::GPS_ASCII => {
                    need(mbuf, 2, "gps ascii")?;
                    mbuf.skip(4)?;
                    let words = mbuf.get_be32()? as usize;
                    skip_words(mbuf, words, "gps ascii")?;
                }
                indicator::ASSOC_LISTS => {
                    need(mbuf, 2, "association lists")?;
                    let first = mbuf.get_be32()?;
                    let second = mbuf.get_be32()?;
                    let source = ((first >> 16) & 0x1FF) as usize;
                    let system = (first & 0x1FF) as usize;
                    let vector = (second >> 16) as usize;
                    let mut asynchronous = (second & 0x7FFF) as usize;
                    if second & 0x8000 != 0 {
                        // Tags follow the asynchronous list.
                        asynchronous *= 2;
                    }
                    skip_words(mbuf, source + system + vector + asynchronous, "association lists")?;
                }
                other => {
                    if let Some(&(_, words, field)) = DISCARDED.iter().find(|d| d.0 == other) {
                        skip_words(mbuf, words, field)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn encode<U>(&self, mbuf: &mut Mbuf<U>) -> Result<(), Vita49Error> {
        let bits = self.indicator & indicator::KEPT;
        mbuf.set_be32(bits)?;
        if bits & indicator::BANDWIDTH != 0 {
            mbuf.set_be64(to_fixed64(self.bandwidth, FREQ_RADIX))?;
        }
        if bits & indicator::IF_REF_FREQ != 0 {
            mbuf.set_be64(to_fixed64(self.if_ref_freq, FREQ_RADIX))?;
        }
        if bits & indicator::RF_REF_FREQ != 0 {
            mbuf.set_be64(to_fixed64(self.rf_ref_freq, FREQ_RADIX))?;
        }
        if bits & indicator::REF_LEVEL != 0 {
            mbuf.set_be32(to_fixed16(self.ref_level, LEVEL_RADIX) as u32)?;
        }
        if bits & indicator::GAIN != 0 {
            let stage2 = to_fixed16(self.gain_stage2, LEVEL_RADIX) as u32;
            let stage1 = to_fixed16(self.gain_stage1, LEVEL_RADIX) as u32;
            mbuf.set_be32((stage2 << 16) | stage1)?;
        }
        if bits & indicator::SAMPLE_RATE != 0 {
            mbuf.set_be64(to_fixed64(self.sample_rate, FREQ_RADIX))?;
        }
        if bits & indicator::TEMPERATURE != 0 {
            mbuf.set_be32(to_fixed16(self.temperature, TEMP_RADIX) as u32)?;
        }
        Ok(())
    }
}

fn need<U>(mbuf: &Mbuf<U>, words: usize, field: &'static str) -> Result<(), Vita49Error> {
    if words * 4 > mbuf.available() {
        Err(Vita49Error::overrun(field))
    } else {
        Ok(())
    }
}

fn skip_words<U>(mbuf: &mut Mbuf<U>, words: usize, field: &'static str) -> Result<(), Vita49Error> {
    need(mbuf, words, field)?;
    mbuf.skip(words * 4)?;
    Ok(())
}

fn get_freq<U>(mbuf: &mut Mbuf<U>, field: &'static str) -> Result<f64, Vita49Error> {
    need(mbuf, 2, field)?;
    Ok(from_fixed64(mbuf.get_be64()?, FREQ_RADIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_words(words: &[u32]) -> Result<Context, Vita49Error> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let mut m: Mbuf = Mbuf::from_bytes(&bytes);
        let mut context = Context::default();
        context.decode(&mut m)?;
        assert_eq!(m.available(), 0);
        Ok(context)
    }

    #[test]
    fn test_sample_rate_only() {
        let raw: u64 = 500_000 << 20;
        let context = decode_words(&[indicator::SAMPLE_RATE, (raw >> 32) as u32, raw as u32])
            .expect("decode");
        assert_eq!(context.sample_rate, 500_000.0);
        assert!(context.has(indicator::SAMPLE_RATE));
        assert!(!context.has(indicator::BANDWIDTH));
    }

    #[test]
    fn test_discarded_fields_keep_alignment() {
        let bits = indicator::REF_POINT
            | indicator::OVER_RANGE
            | indicator::TEMPERATURE
            | indicator::GPS
            | indicator::GPS_ASCII;
        let mut words = vec![bits, 0xdead, 0xbeef, 80 << 6];
        words.extend([0u32; 11]);
        words.extend([0x0012_A2, 2, 0x4142_4344, 0x4546_4748]);
        let context = decode_words(&words).expect("decode");
        assert_eq!(context.temperature, 80.0);
    }

    #[test]
    fn test_assoc_lists() {
        // 1 source, 2 system, 1 vector, 1 async with tags.
        let words = [indicator::ASSOC_LISTS, (1 << 16) | 2, (1 << 16) | 0x8001, 1, 2, 3, 4, 5, 6];
        assert!(decode_words(&words).is_ok());
    }

    #[test]
    fn test_round_trip_kept_fields() {
        let context = Context {
            indicator: indicator::KEPT,
            bandwidth: 20e6,
            if_ref_freq: 0.0,
            rf_ref_freq: 2.45e9,
            ref_level: -10.5,
            gain_stage1: 12.25,
            gain_stage2: -3.0,
            sample_rate: 30.72e6,
            temperature: 41.5,
        };

        let mut m: Mbuf = Mbuf::alloc(128);
        for _ in 0..3 {
            m.reset();
            context.encode(&mut m).expect("encode");
            m.rewind();
            let mut decoded = Context::default();
            decoded.decode(&mut m).expect("decode");
            assert_eq!(decoded, context);
        }
    }

    #[test]
    fn test_rejects_reserved_and_short() {
        assert!(matches!(
            decode_words(&[0x01]),
            Err(Vita49Error::BadField(_))
        ));
        assert!(matches!(
            decode_words(&[indicator::BANDWIDTH, 0]),
            Err(Vita49Error::Overrun { field: "bandwidth" })
        ));
    }
}
