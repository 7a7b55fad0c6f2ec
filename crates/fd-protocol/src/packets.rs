use serde::{Deserialize, Serialize};

// -- Heartbeat / Ack Packet (16 bytes) --
// The same frame travels in both directions: the monitor sends it as a
// heartbeat and the responder echoes it back unchanged as the ack.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Heartbeat {
    pub epoch: i64,
    pub sequence: i64,
}

impl Heartbeat {
    /// epoch(8) + sequence(8), both big-endian
    pub const SIZE: usize = 16;

    pub fn new(epoch: i64, sequence: i64) -> Self {
        Self { epoch, sequence }
    }

    pub fn serialize(&self, buf: &mut [u8; Self::SIZE]) {
        buf[0..8].copy_from_slice(&self.epoch.to_be_bytes());
        buf[8..16].copy_from_slice(&self.sequence.to_be_bytes());
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        self.serialize(&mut buf);
        buf
    }

    /// Only the length is validated; every pair of i64 values is a valid frame.
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() != Self::SIZE {
            return None;
        }

        Some(Self {
            epoch: i64::from_be_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ]),
            sequence: i64::from_be_bytes([
                data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
            ]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_roundtrip() {
        let packet = Heartbeat::new(2020, 42);

        let mut buf = [0u8; Heartbeat::SIZE];
        packet.serialize(&mut buf);
        let decoded = Heartbeat::deserialize(&buf).unwrap();

        assert_eq!(decoded.epoch, 2020);
        assert_eq!(decoded.sequence, 42);
    }

    #[test]
    fn test_heartbeat_layout_is_big_endian() {
        let buf = Heartbeat::new(1, 0x0102_0304_0506_0708).encode();

        assert_eq!(&buf[0..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&buf[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_negative_values_survive() {
        let buf = Heartbeat::new(-1, i64::MIN).encode();
        assert_eq!(&buf[0..8], &[0xFF; 8]);

        let decoded = Heartbeat::deserialize(&buf).unwrap();
        assert_eq!(decoded, Heartbeat::new(-1, i64::MIN));
    }

    #[test]
    fn test_reject_wrong_length() {
        assert!(Heartbeat::deserialize(&[]).is_none());
        assert!(Heartbeat::deserialize(&[0u8; 5]).is_none());
        assert!(Heartbeat::deserialize(&[0u8; 15]).is_none());
        assert!(Heartbeat::deserialize(&[0u8; 17]).is_none());
        assert!(Heartbeat::deserialize(&[0u8; 32]).is_none());
    }

    #[test]
    fn test_any_content_is_accepted() {
        let decoded = Heartbeat::deserialize(&[0xAB; Heartbeat::SIZE]).unwrap();
        assert_eq!(decoded.epoch, decoded.sequence);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(Heartbeat::new(7, 9)).unwrap();
        assert_eq!(json["epoch"], 7);
        assert_eq!(json["sequence"], 9);
    }
}
