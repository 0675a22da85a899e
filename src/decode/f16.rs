use half::f16;

/// Convert a linear-light value in [0, 1] to an sRGB-encoded byte in [0, 255].
///
/// Implements the sRGB electro-optical transfer function (EOTF⁻¹) defined in
/// IEC 61966-2-1:1999, Section 4.7:
///
///   - Linear segment:  C_srgb = 12.92 · C_linear          when C_linear ≤ 0.0031308
///   - Gamma segment:   C_srgb = 1.055 · C_linear^(1/2.4) − 0.055   otherwise
///
/// The threshold 0.0031308 and the constants 12.92, 1.055, 0.055, and the
/// exponent 1/2.4 are all specified by the standard to ensure a smooth
/// transition between the two segments at the junction point.
pub(crate) fn linear_to_srgb_u8(v: f32) -> u8 {
    let c = v.clamp(0.0, 1.0);
    let srgb = if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (srgb * 255.0 + 0.5).floor().clamp(0.0, 255.0) as u8
}

/// Quantize a linear value in [0, 1] to 8 bits with round-to-nearest.
#[inline(always)]
pub(crate) fn quantize_unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5).floor() as u8
}

/// Decode one IEEE 754 binary16 component from little-endian bytes.
#[inline(always)]
pub(crate) fn f16_from_le(bytes: &[u8]) -> f32 {
    f16::from_bits(u16::from_le_bytes([bytes[0], bytes[1]])).to_f32()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_encode_endpoints() {
        assert_eq!(linear_to_srgb_u8(0.0), 0);
        assert_eq!(linear_to_srgb_u8(1.0), 255);
        // Out-of-range input clamps instead of wrapping.
        assert_eq!(linear_to_srgb_u8(-2.0), 0);
        assert_eq!(linear_to_srgb_u8(7.5), 255);
    }

    #[test]
    fn srgb_midpoint_matches_reference_value() {
        // sRGB(0.5) = 1.055 * 0.5^(1/2.4) - 0.055 ≈ 0.7354 → 188.
        assert_eq!(linear_to_srgb_u8(0.5), 188);
    }

    #[test]
    fn srgb_linear_segment_below_threshold() {
        // 0.003 < 0.0031308, so the linear segment applies: 0.003 * 12.92.
        assert_eq!(linear_to_srgb_u8(0.003), (0.003f32 * 12.92 * 255.0 + 0.5) as u8);
    }

    #[test]
    fn quantize_rounds_to_nearest() {
        assert_eq!(quantize_unorm8(0.0), 0);
        assert_eq!(quantize_unorm8(1.0), 255);
        assert_eq!(quantize_unorm8(0.5), 128);
        assert_eq!(quantize_unorm8(2.0), 255);
    }

    #[test]
    fn f16_roundtrip_through_bytes() {
        let one = f16::from_f32(1.0).to_bits().to_le_bytes();
        assert_eq!(f16_from_le(&one), 1.0);
        let two = f16::from_f32(2.0).to_bits().to_le_bytes();
        assert_eq!(f16_from_le(&two), 2.0);
    }
}
