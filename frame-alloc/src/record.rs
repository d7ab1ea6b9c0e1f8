// A single bookkeeping entry
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Record {
    pub taken: bool,
}

impl Record {
    pub(crate) const PER_BYTE: usize = 8;

    pub(crate) fn from_byte(byte: u8) -> [Record; Self::PER_BYTE] {
        let mut records = [Default::default(); Self::PER_BYTE];
        for (i, record) in records.iter_mut().enumerate() {
            *record = Record {
                taken: (byte >> i) & 1 != 0,
            };
        }
        records
    }

    pub(crate) fn to_byte(records: [Record; Self::PER_BYTE]) -> u8 {
        let mut byte = 0;
        for (i, record) in records.iter().enumerate() {
            if record.taken {
                byte |= 1 << i;
            }
        }
        byte
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_from() {
        for byte in [0x00, 0xff, 0xba, 0xdd, 0xec, 0xaf] {
            let records = Record::from_byte(byte);
            assert_eq!(byte, Record::to_byte(records));
        }
    }
}
