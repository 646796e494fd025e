//! 24-bit pick id <-> RGBA8 color. The alpha byte is a checksum of the color
//! bytes so that blended or interpolated fragments, and the cleared
//! background, never decode to an entity.

/// Number of distinct ids representable in the three color channels.
pub const ID_SPACE: u32 = 1 << 24;

/// Avalanche mix of the three color bytes folded to eight bits.
pub fn checksum(r: u8, g: u8, b: u8) -> u8 {
    let mut h = u32::from(r) | (u32::from(g) << 8) | (u32::from(b) << 16);
    h = h.wrapping_mul(0x9E37_79B1);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85EB_CA6B);
    h ^= h >> 13;
    let folded = h ^ (h >> 8) ^ (h >> 16) ^ (h >> 24);
    (folded as u8) ^ 0xA5
}

/// Encode `id` as `[r, g, b, checksum]`. Returns `None` for ids outside the
/// 24-bit space.
pub fn encode(id: u32) -> Option<[u8; 4]> {
    if id >= ID_SPACE {
        return None;
    }
    let r = (id & 0xFF) as u8;
    let g = ((id >> 8) & 0xFF) as u8;
    let b = ((id >> 16) & 0xFF) as u8;
    Some([r, g, b, checksum(r, g, b)])
}

pub fn decode(rgba: [u8; 4]) -> Option<u32> {
    let [r, g, b, a] = rgba;
    if a != checksum(r, g, b) {
        return None;
    }
    Some(u32::from(r) | (u32::from(g) << 8) | (u32::from(b) << 16))
}

/// Normalized color for an `Rgba8Unorm` target; each channel survives the
/// float round trip exactly.
pub fn to_unorm(rgba: [u8; 4]) -> [f32; 4] {
    rgba.map(|channel| f32::from(channel) / 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_never_decodes() {
        assert_ne!(checksum(0, 0, 0), 0);
        assert_eq!(decode([0, 0, 0, 0]), None);
        assert_eq!(decode([0, 0, 0, 255]), None);
        assert_eq!(decode(encode(0).expect("zero encodes")), Some(0));
    }

    #[test]
    fn every_id_round_trips() {
        for id in 0..ID_SPACE {
            let color = encode(id).expect("id inside 24-bit space");
            assert_eq!(decode(color), Some(id), "id {id:#08x}");
        }
        assert_eq!(encode(ID_SPACE), None);
    }

    #[test]
    fn random_pixels_are_rejected() {
        // xorshift32, fixed seed
        let mut state = 0x1234_5678u32;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        let samples = 1 << 16;
        let accepted = (0..samples)
            .filter(|_| decode(next().to_le_bytes()).is_some())
            .count();
        // One alpha value out of 256 matches for any color.
        assert!(accepted * 256 <= samples * 13 / 10, "accepted {accepted}");
    }

    #[test]
    fn single_channel_corruption_is_caught() {
        let color = encode(0x12_34_56).expect("encodable");
        let mut misses = 0;
        for channel in 0..3 {
            for delta in 1..=255u8 {
                let mut corrupted = color;
                corrupted[channel] = corrupted[channel].wrapping_add(delta);
                if decode(corrupted).is_some() {
                    misses += 1;
                }
            }
        }
        assert!(misses <= 8, "{misses} corrupted colors slipped through");
    }

    #[test]
    fn unorm_conversion_is_exact() {
        let color = encode(0xAB_CD_EF).expect("encodable");
        let unorm = to_unorm(color);
        let restored = unorm.map(|c| (c * 255.0).round() as u8);
        assert_eq!(restored, color);
    }
}
