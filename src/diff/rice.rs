//! Bit-level Golomb-Rice decoding.

use crate::api::RiceDeltaEncoding;
use crate::{Error, Result};

/// Largest Rice parameter accepted from the server.
pub const MAX_RICE_PARAMETER: u32 = 32;

/// Reads bits least-significant first from a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    buf: &'a [u8],
    /// Bit offset into `buf`.
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Read `n` bits (at most 32) into the low bits of the result.
    ///
    /// Errors if the stream runs out first.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(Error::Decode(format!("cannot read {} bits at once", n)));
        }
        if self.bits_remaining() < n as usize {
            return Err(Error::Decode("unexpected end of rice data".to_string()));
        }
        let mut v = 0u32;
        for i in 0..n {
            let byte = self.buf[self.pos / 8];
            if byte & (1 << (self.pos % 8)) != 0 {
                v |= 1 << i;
            }
            self.pos += 1;
        }
        Ok(v)
    }

    pub fn bits_remaining(&self) -> usize {
        self.buf.len() * 8 - self.pos
    }
}

/// Decodes Rice values with a fixed parameter `k` from a [`BitReader`].
#[derive(Debug)]
pub struct RiceDecoder<'a> {
    reader: BitReader<'a>,
    k: u32,
}

impl<'a> RiceDecoder<'a> {
    pub fn new(reader: BitReader<'a>, k: u32) -> Self {
        Self { reader, k }
    }

    /// Read one value: a unary quotient (1-bits ended by a 0) then `k` remainder bits.
    pub fn read_value(&mut self) -> Result<u32> {
        let mut quotient = 0u64;
        while self.reader.read_bits(1)? == 1 {
            quotient += 1;
        }
        let remainder = self.reader.read_bits(self.k)?;
        let value = quotient
            .checked_shl(self.k)
            .filter(|v| v >> self.k == quotient)
            .map(|v| v | remainder as u64)
            .ok_or_else(|| Error::Decode("rice value overflows 64 bits".to_string()))?;
        u32::try_from(value)
            .map_err(|_| Error::Decode(format!("rice value {} exceeds 32 bits", value)))
    }

    pub fn bits_remaining(&self) -> usize {
        self.reader.bits_remaining()
    }
}

/// Expand a delta-coded run into absolute values, first value included.
pub fn decode_rice_integers(rice: &RiceDeltaEncoding) -> Result<Vec<u32>> {
    if rice.rice_parameter > MAX_RICE_PARAMETER {
        return Err(Error::Decode(format!(
            "rice parameter {} out of range",
            rice.rice_parameter
        )));
    }
    let first = u32::try_from(rice.first_value)
        .map_err(|_| Error::Decode(format!("first value {} exceeds 32 bits", rice.first_value)))?;

    let mut values = Vec::with_capacity(rice.entry_count as usize + 1);
    values.push(first);

    let mut decoder = RiceDecoder::new(BitReader::new(&rice.encoded_data), rice.rice_parameter);
    let mut last = first;
    for _ in 0..rice.entry_count {
        let delta = decoder.read_value()?;
        last = last
            .checked_add(delta)
            .ok_or_else(|| Error::Decode(format!("delta {} after {} exceeds 32 bits", delta, last)))?;
        values.push(last);
    }

    if decoder.bits_remaining() >= 8 {
        return Err(Error::Decode("excess rice encoded data".to_string()));
    }
    Ok(values)
}

/// Test helper: Rice-encode an ascending sequence.
#[cfg(test)]
pub(crate) fn encode_rice_integers(values: &[u32], k: u32) -> RiceDeltaEncoding {
    let mut data = Vec::new();
    let mut pos = 0usize;
    let mut push_bit = |bit: bool| {
        if pos % 8 == 0 {
            data.push(0u8);
        }
        if bit {
            let last = data.len() - 1;
            data[last] |= 1 << (pos % 8);
        }
        pos += 1;
    };
    for pair in values.windows(2) {
        let delta = (pair[1] - pair[0]) as u64;
        for _ in 0..(delta >> k) {
            push_bit(true);
        }
        push_bit(false);
        for i in 0..k {
            push_bit(delta & (1 << i) != 0);
        }
    }
    RiceDeltaEncoding {
        first_value: values.first().copied().unwrap_or(0) as u64,
        rice_parameter: k,
        entry_count: values.len().saturating_sub(1) as u32,
        encoded_data: data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_reader() {
        let data = hex::decode("0d020000000437").unwrap();
        let mut br = BitReader::new(&data);
        let steps: [(u32, u32, usize); 9] = [
            (0, 0, 56),
            (1, 1, 55),
            (1, 0, 54),
            (1, 1, 53),
            (1, 1, 52),
            (8, 0x20, 44),
            (32, 0x40000000, 12),
            (9, 0x170, 3),
            (3, 1, 0),
        ];
        for (i, (n, want, remaining)) in steps.into_iter().enumerate() {
            assert_eq!(br.read_bits(n).unwrap(), want, "step {}", i);
            assert_eq!(br.bits_remaining(), remaining, "step {}", i);
        }
        assert!(br.read_bits(1).is_err());
    }

    #[test]
    fn test_bit_reader_empty() {
        let mut br = BitReader::new(&[]);
        assert_eq!(br.read_bits(0).unwrap(), 0);
        assert!(br.read_bits(1).is_err());
    }

    #[test]
    fn test_rice_decoder() {
        let vectors: Vec<(u32, &str, Vec<u32>)> = vec![
            (2, "f702", vec![15, 9]),
            (5, "00", vec![0]),
            (10, "", vec![]),
            (
                28,
                "54607be70a5fc1dcee69defe583ca3d6a5f2108c4a595600",
                vec![62763050, 1046523781, 192522171, 1800511020, 4442775, 582142548],
            ),
        ];
        for (k, input, want) in vectors {
            let data = hex::decode(input).unwrap();
            let mut rd = RiceDecoder::new(BitReader::new(&data), k);
            let got: Vec<u32> = (0..want.len()).map(|_| rd.read_value().unwrap()).collect();
            assert_eq!(got, want, "k={}", k);
        }
    }

    #[test]
    fn test_decode_rice_integers() {
        let rice = RiceDeltaEncoding {
            first_value: 172,
            rice_parameter: 28,
            entry_count: 5,
            encoded_data: hex::decode("720000c0210000100400001a01006017000000").unwrap(),
        };
        assert_eq!(
            decode_rice_integers(&rice).unwrap(),
            vec![172, 229, 364, 494, 776, 963]
        );

        let single = RiceDeltaEncoding {
            first_value: 998,
            ..Default::default()
        };
        assert_eq!(decode_rice_integers(&single).unwrap(), vec![998]);
    }

    #[test]
    fn test_round_trip_and_truncation() {
        let values = vec![3, 17, 18, 1000, 4096, 70000, 70001, 1 << 20];
        let encoded = encode_rice_integers(&values, 6);
        assert_eq!(decode_rice_integers(&encoded).unwrap(), values);

        let mut truncated = encoded.clone();
        truncated.encoded_data.pop();
        assert!(decode_rice_integers(&truncated).is_err());
    }

    #[test]
    fn test_excess_data_rejected() {
        let mut encoded = encode_rice_integers(&[5, 9, 12], 2);
        encoded.encoded_data.push(0);
        assert!(decode_rice_integers(&encoded).is_err());
    }

    #[test]
    fn test_bad_parameters() {
        let rice = RiceDeltaEncoding {
            rice_parameter: 33,
            ..Default::default()
        };
        assert!(decode_rice_integers(&rice).is_err());

        let rice = RiceDeltaEncoding {
            first_value: u64::from(u32::MAX) + 1,
            ..Default::default()
        };
        assert!(decode_rice_integers(&rice).is_err());
    }

    #[test]
    fn test_value_wider_than_32_bits() {
        // Quotient 1 with k=32 encodes 2^32.
        let rice = RiceDeltaEncoding {
            first_value: 0,
            rice_parameter: 32,
            entry_count: 1,
            encoded_data: vec![1, 0, 0, 0, 0],
        };
        assert!(matches!(decode_rice_integers(&rice), Err(Error::Decode(_))));
    }

    #[test]
    fn test_running_sum_overflow() {
        let mut rice = encode_rice_integers(&[0, 2], 2);
        rice.first_value = u64::from(u32::MAX);
        assert!(matches!(decode_rice_integers(&rice), Err(Error::Decode(_))));

        // The largest representable sum still decodes.
        let mut rice = encode_rice_integers(&[0, 2], 2);
        rice.first_value = u64::from(u32::MAX - 2);
        assert_eq!(decode_rice_integers(&rice).unwrap(), vec![u32::MAX - 2, u32::MAX]);
    }
}
