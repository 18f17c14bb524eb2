use std::collections::BTreeMap;

use crate::{color::DUTY_MAX, error::TlvError, pwm::Channel};

pub const MAGIC: u16 = 0xD40E;
pub const TERMINATOR: u16 = 0xFFFF;

pub const TAG_RED: u16 = 1;
pub const TAG_GREEN: u16 = 2;
pub const TAG_BLUE: u16 = 3;
pub const TAG_AUTH: u16 = 4;

pub const MAX_DATAGRAM_BYTES: usize = 1024;

const HEADER_SIZE: usize = 4;
const ENTRY_HEADER_SIZE: usize = 4;

// BSD rotating sum with the checksum field (bytes 2 and 3) read as zero.
pub fn checksum(datagram: &[u8]) -> u16 {
    datagram
        .iter()
        .enumerate()
        .fold(0u16, |sum, (index, &byte)| {
            let byte = if (2..HEADER_SIZE).contains(&index) { 0 } else { byte };
            sum.rotate_right(1).wrapping_add(u16::from(byte))
        })
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvMessage {
    entries: BTreeMap<u16, Vec<u8>>,
}

impl TlvMessage {
    pub fn decode(datagram: &[u8]) -> Result<Self, TlvError> {
        if datagram.len() < HEADER_SIZE {
            return Err(TlvError::TooShort(datagram.len()));
        }
        let magic = read_u16(datagram, 0);
        if magic != MAGIC {
            return Err(TlvError::BadMagic(magic));
        }
        let received = read_u16(datagram, 2);
        let computed = checksum(datagram);
        if received != computed {
            return Err(TlvError::ChecksumMismatch { received, computed });
        }

        let mut entries = BTreeMap::new();
        let mut pos = HEADER_SIZE;
        while pos < datagram.len() {
            let remaining = datagram.len() - pos;
            if remaining >= 2 && read_u16(datagram, pos) == TERMINATOR {
                break;
            }
            if remaining < ENTRY_HEADER_SIZE {
                return Err(TlvError::Truncated(pos));
            }
            let tag = read_u16(datagram, pos);
            let len = usize::from(read_u16(datagram, pos + 2));
            let start = pos + ENTRY_HEADER_SIZE;
            let end = start + len;
            if end > datagram.len() {
                return Err(TlvError::Truncated(pos));
            }
            entries.insert(tag, datagram[start..end].to_vec());
            pos = end;
        }

        Ok(Self { entries })
    }

    pub fn get(&self, tag: u16) -> Option<&[u8]> {
        self.entries.get(&tag).map(Vec::as_slice)
    }

    pub fn authorize(&self, secret: &str) -> Result<(), TlvError> {
        if secret.is_empty() {
            return Ok(());
        }
        match self.get(TAG_AUTH) {
            Some(token) if token == secret.as_bytes() => Ok(()),
            _ => Err(TlvError::Unauthorized),
        }
    }

    pub fn channel_duties(&self) -> Vec<(Channel, u16)> {
        [
            (TAG_RED, Channel::Red),
            (TAG_GREEN, Channel::Green),
            (TAG_BLUE, Channel::Blue),
        ]
        .into_iter()
        .filter_map(|(tag, channel)| match self.get(tag)? {
            &[high, low] => {
                let duty = u16::from_be_bytes([high, low]);
                (duty <= DUTY_MAX).then_some((channel, duty))
            }
            _ => None,
        })
        .collect()
    }
}

#[cfg(test)]
pub(crate) fn encode(entries: &[(u16, &[u8])]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        HEADER_SIZE
            + entries
                .iter()
                .map(|(_, value)| ENTRY_HEADER_SIZE + value.len())
                .sum::<usize>(),
    );
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    for &(tag, value) in entries {
        let len = u16::try_from(value.len()).unwrap_or(u16::MAX);
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&value[..usize::from(len)]);
    }
    let sum = checksum(&out);
    out[2..HEADER_SIZE].copy_from_slice(&sum.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn checksum_matches_reference_values() {
        assert_eq!(checksum(&[0xD4, 0x0E, 0xAA, 0xBB]), 0x001E);
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1]), 1);
        assert_eq!(checksum(&[1, 0]), 0x8000);
    }

    #[test]
    fn sets_listed_channels_only() {
        let datagram = encode(&[
            (TAG_RED, &512u16.to_be_bytes()),
            (TAG_BLUE, &1023u16.to_be_bytes()),
        ]);

        let message = TlvMessage::decode(&datagram).unwrap();

        assert_eq!(
            message.channel_duties(),
            vec![(Channel::Red, 512), (Channel::Blue, 1023)]
        );
    }

    #[test]
    fn out_of_range_and_odd_length_values_are_skipped() {
        let datagram = encode(&[
            (TAG_RED, &1024u16.to_be_bytes()),
            (TAG_GREEN, &[1]),
            (TAG_BLUE, &7u16.to_be_bytes()),
        ]);

        let message = TlvMessage::decode(&datagram).unwrap();

        assert_eq!(message.channel_duties(), vec![(Channel::Blue, 7)]);
    }

    #[test]
    fn last_occurrence_of_a_tag_wins() {
        let datagram = encode(&[
            (TAG_GREEN, &100u16.to_be_bytes()),
            (TAG_GREEN, &200u16.to_be_bytes()),
        ]);

        let message = TlvMessage::decode(&datagram).unwrap();

        assert_eq!(message.channel_duties(), vec![(Channel::Green, 200)]);
    }

    #[test]
    fn unknown_tags_are_ignored() {
        let datagram = encode(&[(99, b"whatever"), (TAG_RED, &3u16.to_be_bytes())]);

        let message = TlvMessage::decode(&datagram).unwrap();

        assert_eq!(message.get(99), Some(&b"whatever"[..]));
        assert_eq!(message.channel_duties(), vec![(Channel::Red, 3)]);
    }

    #[test]
    fn terminator_stops_parsing() {
        let mut datagram = encode(&[(TAG_RED, &9u16.to_be_bytes())]);
        datagram.extend_from_slice(&TERMINATOR.to_be_bytes());
        datagram.extend_from_slice(&[0xAB; 5]);
        let sum = checksum(&datagram);
        datagram[2..4].copy_from_slice(&sum.to_be_bytes());

        let message = TlvMessage::decode(&datagram).unwrap();

        assert_eq!(message.channel_duties(), vec![(Channel::Red, 9)]);
    }

    #[test]
    fn framing_errors() {
        assert_eq!(TlvMessage::decode(&[0xD4]), Err(TlvError::TooShort(1)));
        assert_eq!(
            TlvMessage::decode(&[0x12, 0x34, 0, 0]),
            Err(TlvError::BadMagic(0x1234))
        );

        let mut truncated = encode(&[(TAG_RED, &9u16.to_be_bytes())]);
        truncated.pop();
        let sum = checksum(&truncated);
        truncated[2..4].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(TlvMessage::decode(&truncated), Err(TlvError::Truncated(4)));
    }

    #[test]
    fn auth_token_must_match_exactly() {
        let good = encode(&[(TAG_AUTH, b"secret"), (TAG_RED, &1u16.to_be_bytes())]);
        let bad = encode(&[(TAG_AUTH, b"secret2"), (TAG_RED, &1u16.to_be_bytes())]);
        let missing = encode(&[(TAG_RED, &1u16.to_be_bytes())]);

        let decode = |datagram: &[u8]| TlvMessage::decode(datagram).unwrap();

        assert_eq!(decode(&good).authorize("secret"), Ok(()));
        assert_eq!(decode(&bad).authorize("secret"), Err(TlvError::Unauthorized));
        assert_eq!(decode(&missing).authorize("secret"), Err(TlvError::Unauthorized));
        assert_eq!(decode(&missing).authorize(""), Ok(()));
    }

    proptest! {
        #[test]
        fn any_single_byte_change_is_rejected(
            red in 0u16..=1023,
            green in 0u16..=1023,
            index in 0usize..16,
            flip in 1u8..=255,
        ) {
            let mut datagram = encode(&[
                (TAG_RED, &red.to_be_bytes()),
                (TAG_GREEN, &green.to_be_bytes()),
            ]);
            prop_assert_eq!(datagram.len(), 16);
            datagram[index] ^= flip;

            prop_assert!(TlvMessage::decode(&datagram).is_err());
        }
    }
}
