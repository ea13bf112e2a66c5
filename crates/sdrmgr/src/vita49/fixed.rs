// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two's-complement fixed-point conversions.

/// Fraction bits of frequency, sample rate and bandwidth fields (64-bit).
pub const FREQ_RADIX: u32 = 20;

/// Fraction bits of reference level and gain fields (16 significant bits).
pub const LEVEL_RADIX: u32 = 7;

/// Fraction bits of the temperature field (16 significant bits).
pub const TEMP_RADIX: u32 = 6;

/// Fraction bits of the command priority (Q16.16).
pub const PRIORITY_RADIX: u32 = 16;

fn scale(radix: u32) -> f64 {
    (1u64 << radix) as f64
}

pub fn from_fixed64(raw: u64, radix: u32) -> f64 {
    raw as i64 as f64 / scale(radix)
}

/// Saturates at the `i64` range.
pub fn to_fixed64(value: f64, radix: u32) -> u64 {
    (value * scale(radix)).round() as i64 as u64
}

pub fn from_fixed32(raw: u32, radix: u32) -> f64 {
    raw as i32 as f64 / scale(radix)
}

pub fn to_fixed32(value: f64, radix: u32) -> u32 {
    (value * scale(radix)).round() as i32 as u32
}

pub fn from_fixed16(raw: u16, radix: u32) -> f64 {
    raw as i16 as f64 / scale(radix)
}

pub fn to_fixed16(value: f64, radix: u32) -> u16 {
    (value * scale(radix)).round() as i16 as u16
}
