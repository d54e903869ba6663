//! Encoding of datapoints into ClickHouse RowBinary write units.
//!
//! A [`WriteBuffer`] is what receivers hand downstream. Each row is laid out
//! as:
//!
//! | column    | type   | encoding                          |
//! |-----------|--------|-----------------------------------|
//! | Path      | String | uvarint length, then UTF-8 bytes  |
//! | Value     | Float64| little-endian                     |
//! | Time      | UInt32 | little-endian                     |
//! | Date      | Date   | UInt16 days since epoch, LE       |
//! | Timestamp | UInt32 | receive time, little-endian       |

use bytes::{BufMut, Bytes, BytesMut};

use super::metric::Point;

const SECONDS_PER_DAY: u32 = 86_400;

/// A batch of encoded rows.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    body: BytesMut,
    rows: usize,
}

impl WriteBuffer {
    pub fn new() -> WriteBuffer {
        WriteBuffer::default()
    }

    pub fn with_capacity(capacity: usize) -> WriteBuffer {
        WriteBuffer {
            body: BytesMut::with_capacity(capacity),
            rows: 0,
        }
    }

    /// Append one row. `received_at` is the wall-clock second the payload
    /// carrying `point` arrived.
    pub fn write_point(&mut self, point: &Point, received_at: u32) {
        let name: &str = &point.name;

        put_uvarint(&mut self.body, name.len() as u64);
        self.body.put_slice(name.as_bytes());
        self.body.put_f64_le(point.value);
        self.body.put_u32_le(point.timestamp);
        self.body.put_u16_le(days(point.timestamp));
        self.body.put_u32_le(received_at);

        self.rows += 1;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn freeze(self) -> Bytes {
        self.body.freeze()
    }
}

fn days(timestamp: u32) -> u16 {
    // u32 seconds run out in 2106, well inside u16 days.
    (timestamp / SECONDS_PER_DAY) as u16
}

fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uvarint(value: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, value);
        buf.to_vec()
    }

    #[test]
    fn it_encodes_uvarints() {
        assert_eq!(uvarint(0), vec![0x00]);
        assert_eq!(uvarint(127), vec![0x7f]);
        assert_eq!(uvarint(128), vec![0x80, 0x01]);
        assert_eq!(uvarint(300), vec![0xac, 0x02]);
    }

    #[test]
    fn it_computes_days_since_epoch() {
        assert_eq!(days(0), 0);
        assert_eq!(days(86_399), 0);
        assert_eq!(days(86_400), 1);
        // 2017-07-14
        assert_eq!(days(1_500_000_000), 17_361);
    }

    #[test]
    fn it_writes_a_row() {
        let mut buf = WriteBuffer::new();
        buf.write_point(&Point::new("a.b", 1.5, 86_400), 86_401);

        let mut expected = vec![3u8];
        expected.extend_from_slice(b"a.b");
        expected.extend_from_slice(&1.5f64.to_le_bytes());
        expected.extend_from_slice(&86_400u32.to_le_bytes());
        expected.extend_from_slice(&1u16.to_le_bytes());
        expected.extend_from_slice(&86_401u32.to_le_bytes());

        assert_eq!(buf.as_bytes(), &expected[..]);
        assert_eq!(buf.rows(), 1);
        assert_eq!(buf.len(), expected.len());
    }

    #[test]
    fn it_counts_rows() {
        let mut buf = WriteBuffer::with_capacity(64);
        assert!(buf.is_empty());

        buf.write_point(&Point::new("foo", 1.0, 10), 10);
        buf.write_point(&Point::new("bar", 2.0, 20), 20);

        assert!(!buf.is_empty());
        assert_eq!(buf.rows(), 2);
    }
}
