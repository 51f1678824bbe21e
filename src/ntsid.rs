use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::{self, Read};

/// A Windows security identifier (`S-R-A-S1-S2-...`).
#[derive(PartialEq, Eq, PartialOrd, Clone, Hash)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    pub fn new(revision: u8, authority: u64, sub_authorities: Vec<u32>) -> Self {
        Sid {
            revision,
            authority,
            sub_authorities,
        }
    }

    /// Reads a SID: revision, sub authority count, a 48-bit big endian authority
    /// and then the little endian sub authorities.
    pub fn from_stream<R: Read>(stream: &mut R) -> io::Result<Sid> {
        let revision = stream.read_u8()?;
        let count = stream.read_u8()?;
        let authority = stream.read_u48::<BigEndian>()?;

        let mut sub_authorities = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            sub_authorities.push(stream.read_u32::<LittleEndian>()?);
        }

        Ok(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Size of the SID on the wire.
    pub fn size(&self) -> usize {
        8 + self.sub_authorities.len() * 4
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    pub fn authority(&self) -> u64 {
        self.authority
    }

    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Large authorities are printed in hex, like `ConvertSidToStringSid` does.
        if self.authority >= 1 << 32 {
            write!(f, "S-{}-{:#014X}", self.revision, self.authority)?;
        } else {
            write!(f, "S-{}-{}", self.revision, self.authority)?;
        }

        for sub_authority in &self.sub_authorities {
            write!(f, "-{}", sub_authority)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Sid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::value_variant::BinXmlValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_local_system_sid() {
        let bytes = [1, 1, 0, 0, 0, 0, 0, 5, 18, 0, 0, 0];
        let sid = Sid::from_stream(&mut &bytes[..]).unwrap();
        assert_eq!(sid.to_string(), "S-1-5-18");
        assert_eq!(sid.size(), bytes.len());
    }

    #[test]
    fn test_domain_user_sid() {
        let mut bytes = vec![1, 5, 0, 0, 0, 0, 0, 5];
        for sub in [21_u32, 3_623_811_015, 3_361_044_348, 30_300_820, 1013] {
            bytes.extend_from_slice(&sub.to_le_bytes());
        }
        let sid = Sid::from_stream(&mut &bytes[..]).unwrap();
        assert_eq!(
            sid.to_string(),
            "S-1-5-21-3623811015-3361044348-30300820-1013"
        );
    }

    #[test]
    fn test_truncated_sid_fails() {
        let bytes = [1, 2, 0, 0, 0, 0, 0, 5, 18, 0, 0, 0];
        assert!(Sid::from_stream(&mut &bytes[..]).is_err());
    }

    #[test]
    fn test_sid_values_compare() {
        let system = BinXmlValue::SidType(Sid::new(1, 5, vec![18]));
        let service = BinXmlValue::SidType(Sid::new(1, 5, vec![19]));

        assert!(system < service);
        assert_eq!(system.partial_cmp(&system), Some(std::cmp::Ordering::Equal));
    }
}
